//! Risk-managed trading pipeline.
//!
//! RSI signals sized against a bankroll, gated by a portfolio exposure
//! ceiling, executed (or simulated) on the venue, and recorded in a
//! persisted ledger.

mod engine;
mod error;
mod exchange;
mod ledger;
mod models;
mod risk;
mod strategy;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::engine::{EngineConfig, ExecutionCoordinator};
use crate::ledger::Ledger;
use crate::risk::{RiskConfig, RiskManager};
use crate::strategy::{RsiStrategy, SignalConfig};

/// Trading pipeline CLI.
#[derive(Parser)]
#[command(name = "tradeguard")]
#[command(about = "Risk-managed RSI trading pipeline", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./tradeguard.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Trading venue
    #[arg(short, long, default_value = "bybit")]
    venue: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a symbol and show the signal and sizing (no orders)
    Analyze {
        /// Trading pair (e.g. BTCUSDT)
        symbol: String,

        /// Candle timeframe (1m, 5m, 15m, 1h, 4h, 1d)
        #[arg(short, long, default_value = "1h")]
        timeframe: String,

        /// Risk per trade as percent of bankroll
        #[arg(short, long)]
        risk: Option<f64>,
    },

    /// Start the trading loop
    Run {
        /// Trading pairs to cycle over
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Candle timeframe
        #[arg(short, long, default_value = "1h")]
        timeframe: String,

        /// Polling interval in seconds
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Simulate executions (don't place orders)
        #[arg(long)]
        dry_run: bool,

        /// Risk per trade as percent of bankroll
        #[arg(short, long)]
        risk: Option<f64>,
    },

    /// Close the open position on a symbol
    Close {
        /// Trading pair
        symbol: String,

        /// Exit price; defaults to the venue's last traded price
        #[arg(short, long)]
        price: Option<Decimal>,
    },

    /// Show bankroll, exposure, and open positions
    Status,

    /// Show venue account balances (requires API credentials)
    Balance,

    /// Show cumulative performance statistics
    Stats,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let signal_config = SignalConfig::from_env();
    let risk_config = RiskConfig::from_env();

    match cli.command {
        Commands::Analyze {
            symbol,
            timeframe,
            risk,
        } => {
            let gateway = exchange::connect(&cli.venue)?;
            let ledger = Ledger::new(&cli.database).await?;
            let risk_manager = restore_risk(&ledger, risk_config).await?;

            let candles = gateway.fetch_candles(&symbol, &timeframe, 200).await?;
            let strategy = RsiStrategy::new(signal_config);
            let signal = strategy.evaluate(&symbol, &timeframe, &candles);

            println!("\n=== Signal: {} ({}) ===", symbol, timeframe);
            println!("Action:     {}", signal.action.as_str());
            println!("RSI:        {:.1}", signal.rsi);
            println!("Price:      ${}", signal.reference_price);
            println!("Reason:     {}", signal.reason);

            if signal.is_actionable() {
                if let Some(stop) = signal.stop_loss {
                    println!("Stop Loss:  ${}", stop.round_dp(2));
                }
                if let Some(target) = signal.take_profit {
                    println!("Target:     ${}", target.round_dp(2));
                }

                let sizing = risk_manager.size_position(&signal, risk_percent(risk)?)?;
                println!("\n--- Sizing ---");
                println!("Position:   ${}", sizing.position_size_usd);
                println!("Tokens:     {}", sizing.position_size_tokens);
                println!("Risk:       ${}", sizing.risk_usd);
                println!("Stop Dist:  {}%", sizing.stop_loss_distance_pct);
                println!("Max Loss:   ${}", sizing.max_loss_usd);

                let gate = if risk_manager.can_open(sizing.position_size_usd) {
                    "would pass"
                } else {
                    "would be rejected (exposure ceiling)"
                };
                println!("Gate:       {}", gate);
            }
        }

        Commands::Run {
            symbols,
            timeframe,
            interval,
            dry_run,
            risk,
        } => {
            let gateway = exchange::connect(&cli.venue)?;
            let ledger = Ledger::new(&cli.database).await?;

            let engine_config = EngineConfig {
                symbols: symbols.clone(),
                timeframe,
                poll_interval_secs: interval,
                dry_run,
                risk_percent: risk_percent(risk)?,
                ..EngineConfig::default()
            };

            let mut coordinator = ExecutionCoordinator::new(
                engine_config,
                signal_config,
                risk_config,
                gateway,
                ledger,
            )
            .await?;

            println!("\n=== Trading Pipeline ===");
            println!("Venue:     {}", cli.venue);
            println!("Symbols:   {}", symbols.join(", "));
            println!("Interval:  {}s", interval);
            println!(
                "Mode:      {}",
                if dry_run { "DRY RUN (no orders)" } else { "LIVE TRADING" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = coordinator.run().await {
                tracing::error!(error = %e, "Pipeline error");
            }

            println!("\n{}", coordinator.risk().performance_stats());
        }

        Commands::Close { symbol, price } => {
            let gateway = exchange::connect(&cli.venue)?;
            let ledger = Ledger::new(&cli.database).await?;

            let mut coordinator = ExecutionCoordinator::new(
                EngineConfig::default(),
                signal_config,
                risk_config,
                gateway,
                ledger,
            )
            .await?;

            let pnl = coordinator.close_position(&symbol, price).await?;
            info!(symbol = %symbol, pnl = %pnl.round_dp(2), "Position closed");

            println!("Closed {} for ${:+.2}", symbol, pnl.round_dp(2));
            println!(
                "Bankroll: ${}",
                coordinator.risk().account().bankroll.round_dp(2)
            );
        }

        Commands::Status => {
            let ledger = Ledger::new(&cli.database).await?;
            let risk_manager = restore_risk(&ledger, risk_config).await?;
            let account = risk_manager.account();

            println!("\n=== Account ===");
            println!("Bankroll:         ${}", account.bankroll.round_dp(2));
            println!("Starting:         ${}", account.starting_bankroll.round_dp(2));
            println!("Position Cap:     ${}", account.max_position_size().round_dp(2));
            println!(
                "Exposure:         ${} / ${}",
                risk_manager.open_exposure().round_dp(2),
                risk_manager.exposure_limit().round_dp(2)
            );
            if risk_manager.trading_halted() {
                println!("Trading:          HALTED (bankroll below floor)");
            }

            let open: Vec<_> = risk_manager.open_positions().collect();
            println!("\n=== Open Positions ({}) ===", open.len());
            for trade in open {
                println!(
                    "  {} {} {} @ ${} (${}) stop ${} target ${}",
                    trade.symbol,
                    trade.side.as_str(),
                    trade.size_tokens,
                    trade.entry_price,
                    trade.size_usd.round_dp(2),
                    trade.stop_loss.round_dp(2),
                    trade.take_profit.round_dp(2)
                );
            }
        }

        Commands::Balance => {
            let gateway = exchange::connect(&cli.venue)?;
            let balances = gateway.fetch_balance().await?;

            println!("\n{:<8} {:>18} {:>18}", "COIN", "TOTAL", "AVAILABLE");
            println!("{}", "-".repeat(46));
            for b in balances {
                println!("{:<8} {:>18} {:>18}", b.coin, b.total, b.available);
            }
        }

        Commands::Stats => {
            let ledger = Ledger::new(&cli.database).await?;
            let risk_manager = restore_risk(&ledger, risk_config).await?;
            println!("\n{}", risk_manager.performance_stats());
        }

        Commands::Config => {
            println!("\n=== Signal Configuration ===");
            println!("RSI Period:       {}", signal_config.rsi_period);
            println!("Oversold:         {}", signal_config.oversold);
            println!("Overbought:       {}", signal_config.overbought);
            println!("Stop Loss:        {}%", signal_config.stop_loss_pct * Decimal::from(100));
            println!("Take Profit:      {}%", signal_config.take_profit_pct * Decimal::from(100));

            println!("\n=== Risk Configuration ===");
            println!("Bankroll:         ${}", risk_config.bankroll_usd);
            println!("Risk Multiplier:  {}", risk_config.risk_multiplier);
            println!(
                "Exposure Ceiling: {}%",
                risk_config.exposure_ceiling_fraction * Decimal::from(100)
            );
            println!(
                "Bankroll Floor:   {}%",
                risk_config.min_bankroll_fraction * Decimal::from(100)
            );
        }
    }

    Ok(())
}

/// Rebuild the risk manager from the persisted ledger.
async fn restore_risk(ledger: &Ledger, config: RiskConfig) -> Result<RiskManager> {
    let (bankroll, starting) = ledger.init_account(config.bankroll_usd).await?;
    let open = ledger.open_trades().await?;
    let closed = ledger.closed_trades().await?;
    Ok(RiskManager::restore(config, bankroll, starting, open, closed))
}

fn risk_percent(risk: Option<f64>) -> Result<Option<Decimal>> {
    risk.map(Decimal::try_from).transpose().map_err(Into::into)
}
