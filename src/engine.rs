//! Execution coordinator: drives each symbol through one decision
//! cycle — evaluate, size, gate, execute or simulate, record.
//!
//! The coordinator owns the strategy, the risk manager, the venue
//! gateway, and the persisted ledger. Risk state is mutated only after
//! the venue confirms an order; a gateway failure aborts the cycle with
//! nothing recorded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::exchange::{ExchangeGateway, OrderResult};
use crate::ledger::Ledger;
use crate::models::{PositionSizing, Signal, SignalAction, Trade, TradeSide};
use crate::risk::{RiskConfig, RiskManager};
use crate::strategy::{RsiStrategy, SignalConfig};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Symbols to cycle over
    pub symbols: Vec<String>,

    /// Candle timeframe fed to the strategy
    pub timeframe: String,

    /// Candles fetched per evaluation
    pub candle_limit: u32,

    /// Polling interval between cycles (seconds)
    pub poll_interval_secs: u64,

    /// Simulate executions instead of placing orders
    pub dry_run: bool,

    /// Optional risk override as percent of bankroll
    pub risk_percent: Option<Decimal>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            timeframe: "1h".to_string(),
            candle_limit: 200,
            poll_interval_secs: 60,
            dry_run: true,
            risk_percent: None,
        }
    }
}

/// What a single cycle decided.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Bankroll below the floor; no evaluation performed
    Halted,

    /// A position is already open on this symbol
    InPosition,

    /// The strategy produced no actionable signal
    Waited(Signal),

    /// The exposure gate refused the sized position
    Rejected { signal: Signal, sizing: PositionSizing },

    /// Dry-run execution; nothing recorded
    Simulated {
        signal: Signal,
        sizing: PositionSizing,
        order: OrderResult,
    },

    /// Live order confirmed and recorded
    Executed { signal: Signal, order: OrderResult },
}

/// Main pipeline runner.
pub struct ExecutionCoordinator {
    config: EngineConfig,
    strategy: RsiStrategy,
    risk: RiskManager,
    gateway: Box<dyn ExchangeGateway>,
    ledger: Ledger,
    shutdown: Arc<AtomicBool>,
}

impl ExecutionCoordinator {
    /// Build the coordinator, restoring account and positions from the
    /// persisted ledger.
    pub async fn new(
        config: EngineConfig,
        signal_config: SignalConfig,
        risk_config: RiskConfig,
        gateway: Box<dyn ExchangeGateway>,
        ledger: Ledger,
    ) -> Result<Self> {
        let (bankroll, starting) = ledger.init_account(risk_config.bankroll_usd).await?;
        let open = ledger.open_trades().await?;
        let closed = ledger.closed_trades().await?;

        if !open.is_empty() || !closed.is_empty() {
            info!(
                open = open.len(),
                closed = closed.len(),
                bankroll = %bankroll,
                "Resuming from persisted ledger"
            );
        }

        let risk = RiskManager::restore(risk_config, bankroll, starting, open, closed);

        Ok(Self {
            config,
            strategy: RsiStrategy::new(signal_config),
            risk,
            gateway,
            ledger,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Main polling loop; runs until the shutdown flag is set.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            venue = %self.gateway.venue().as_str(),
            symbols = ?self.config.symbols,
            dry_run = self.config.dry_run,
            poll_interval = self.config.poll_interval_secs,
            "Starting pipeline loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs));

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;

            for symbol in self.config.symbols.clone() {
                match self.run_cycle(&symbol).await {
                    Ok(outcome) => log_outcome(&symbol, &outcome),
                    Err(e) => error!(symbol = %symbol, error = %e, "Cycle failed"),
                }
            }
        }

        info!("Pipeline loop stopped");
        Ok(())
    }

    /// One decision cycle for a symbol.
    pub async fn run_cycle(&mut self, symbol: &str) -> Result<CycleOutcome> {
        if self.risk.trading_halted() {
            warn!(
                bankroll = %self.risk.account().bankroll.round_dp(2),
                "Bankroll below floor; trading halted"
            );
            return Ok(CycleOutcome::Halted);
        }

        if self.risk.has_open_position(symbol) {
            debug!(symbol = %symbol, "Position already open; holding");
            return Ok(CycleOutcome::InPosition);
        }

        // EVALUATE
        let candles = self
            .gateway
            .fetch_candles(symbol, &self.config.timeframe, self.config.candle_limit)
            .await?;
        let signal = self.strategy.evaluate(symbol, &self.config.timeframe, &candles);

        let Some(side) = order_side(signal.action) else {
            return Ok(CycleOutcome::Waited(signal));
        };

        // SIZE
        let sizing = self.risk.size_position(&signal, self.config.risk_percent)?;

        // GATE
        if let Err(e) = self.risk.ensure_can_open(sizing.position_size_usd) {
            warn!(symbol = %symbol, error = %e, "Trade rejected");
            return Ok(CycleOutcome::Rejected { signal, sizing });
        }

        // SIMULATE: no outbound call, no state change
        if self.config.dry_run {
            info!(
                symbol = %symbol,
                side = %side.as_str(),
                size_usd = %sizing.position_size_usd,
                price = %signal.reference_price,
                "Dry run; order not placed"
            );
            let order = OrderResult {
                order_id: format!("dry-{}", uuid::Uuid::new_v4()),
                fill_price: signal.reference_price,
                dry_run: true,
            };
            return Ok(CycleOutcome::Simulated { signal, sizing, order });
        }

        // EXECUTE: a gateway error propagates with nothing mutated
        let order = self
            .gateway
            .submit_order(symbol, side, sizing.position_size_tokens)
            .await?;

        // RECORD
        let trade = Trade::open(
            symbol.to_string(),
            side,
            order.fill_price,
            sizing.position_size_tokens,
            sizing.position_size_usd,
            signal.stop_loss.unwrap_or(order.fill_price),
            signal.take_profit.unwrap_or(order.fill_price),
            order.order_id.clone(),
        );

        self.risk.open_position(trade.clone())?;
        self.ledger.insert_open_trade(&trade).await?;

        Ok(CycleOutcome::Executed { signal, order })
    }

    /// Close the open position on `symbol`. With no price given the
    /// venue's last traded price is used.
    pub async fn close_position(
        &mut self,
        symbol: &str,
        exit_price: Option<Decimal>,
    ) -> Result<Decimal> {
        let exit_price = match exit_price {
            Some(p) => p,
            None => self.gateway.fetch_price(symbol).await?,
        };

        let pnl = self.risk.close_trade(symbol, exit_price)?;
        let trade = self
            .risk
            .ledger()
            .last()
            .cloned()
            .context("Closed trade missing from ledger")?;

        self.ledger
            .finalize_trade(&trade, self.risk.account().bankroll)
            .await?;

        Ok(pnl)
    }
}

fn order_side(action: SignalAction) -> Option<TradeSide> {
    match action {
        SignalAction::Buy => Some(TradeSide::Buy),
        SignalAction::Sell => Some(TradeSide::Sell),
        SignalAction::Wait => None,
    }
}

fn log_outcome(symbol: &str, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Halted => {}
        CycleOutcome::InPosition => {}
        CycleOutcome::Waited(signal) => {
            debug!(symbol = %symbol, rsi = signal.rsi, reason = %signal.reason, "Waiting");
        }
        CycleOutcome::Rejected { .. } => {}
        CycleOutcome::Simulated { signal, sizing, .. } => {
            info!(
                symbol = %symbol,
                action = %signal.action.as_str(),
                size_usd = %sizing.position_size_usd,
                "Simulated"
            );
        }
        CycleOutcome::Executed { signal, order } => {
            info!(
                symbol = %symbol,
                action = %signal.action.as_str(),
                order_id = %order.order_id,
                fill = %order.fill_price,
                "Executed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;

    use crate::error::PipelineError;
    use crate::exchange::{CoinBalance, Venue};
    use crate::models::Candle;

    /// Scripted venue for exercising the coordinator.
    struct MockGateway {
        candles: Vec<Candle>,
        price: Decimal,
        fail_orders: bool,
        order_calls: Arc<AtomicUsize>,
    }

    impl MockGateway {
        fn new(candles: Vec<Candle>, price: Decimal) -> Self {
            Self {
                candles,
                price,
                fail_orders: false,
                order_calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ExchangeGateway for MockGateway {
        fn venue(&self) -> Venue {
            Venue::Bybit
        }

        async fn fetch_price(&self, _symbol: &str) -> Result<Decimal, PipelineError> {
            Ok(self.price)
        }

        async fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: &str,
            _limit: u32,
        ) -> Result<Vec<Candle>, PipelineError> {
            Ok(self.candles.clone())
        }

        async fn fetch_balance(&self) -> Result<Vec<CoinBalance>, PipelineError> {
            Ok(vec![])
        }

        async fn submit_order(
            &self,
            _symbol: &str,
            _side: TradeSide,
            _amount: Decimal,
        ) -> Result<OrderResult, PipelineError> {
            self.order_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_orders {
                return Err(PipelineError::gateway("order rejected"));
            }
            Ok(OrderResult {
                order_id: "mock-1".to_string(),
                fill_price: self.price,
                dry_run: false,
            })
        }
    }

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - ChronoDuration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let close = Decimal::try_from(*c).unwrap();
                Candle {
                    timestamp: start + ChronoDuration::hours(i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: dec!(1),
                }
            })
            .collect()
    }

    /// 16 strictly falling closes drive RSI to 0 and the action to BUY.
    fn falling_candles() -> Vec<Candle> {
        let closes: Vec<f64> = (0..16).map(|i| 100.0 - i as f64).collect();
        candles_from_closes(&closes)
    }

    /// Alternating closes keep RSI balanced; the action stays WAIT.
    fn flat_candles() -> Vec<Candle> {
        let closes: Vec<f64> = (0..16)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        candles_from_closes(&closes)
    }

    async fn coordinator(gateway: MockGateway, dry_run: bool) -> ExecutionCoordinator {
        let config = EngineConfig {
            dry_run,
            ..EngineConfig::default()
        };
        let ledger = Ledger::new("sqlite::memory:").await.unwrap();
        ExecutionCoordinator::new(
            config,
            SignalConfig::default(),
            RiskConfig::default(),
            Box::new(gateway),
            ledger,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn wait_signal_skips_sizing_and_execution() {
        let gateway = MockGateway::new(flat_candles(), dec!(100));
        let calls = gateway.order_calls.clone();
        let mut coordinator = coordinator(gateway, false).await;

        let outcome = coordinator.run_cycle("BTCUSDT").await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Waited(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.risk().open_exposure(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn dry_run_records_nothing_and_skips_gateway() {
        let gateway = MockGateway::new(falling_candles(), dec!(85));
        let calls = gateway.order_calls.clone();
        let mut coordinator = coordinator(gateway, true).await;

        let outcome = coordinator.run_cycle("BTCUSDT").await.unwrap();
        let CycleOutcome::Simulated { order, .. } = outcome else {
            panic!("expected a simulated cycle");
        };
        assert!(order.dry_run);
        assert_eq!(order.fill_price, dec!(85));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.risk().open_exposure(), Decimal::ZERO);
        assert!(coordinator.ledger.open_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_cycle_records_trade_and_exposure() {
        let gateway = MockGateway::new(falling_candles(), dec!(85));
        let calls = gateway.order_calls.clone();
        let mut coordinator = coordinator(gateway, false).await;

        let outcome = coordinator.run_cycle("BTCUSDT").await.unwrap();
        let CycleOutcome::Executed { order, .. } = outcome else {
            panic!("expected an executed cycle");
        };

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(order.order_id, "mock-1");
        assert!(coordinator.risk().has_open_position("BTCUSDT"));
        assert!(coordinator.risk().open_exposure() > Decimal::ZERO);
        assert_eq!(coordinator.ledger.open_trades().await.unwrap().len(), 1);

        // Second cycle holds rather than stacking a duplicate
        let outcome = coordinator.run_cycle("BTCUSDT").await.unwrap();
        assert!(matches!(outcome, CycleOutcome::InPosition));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gateway_failure_leaves_state_untouched() {
        let mut gateway = MockGateway::new(falling_candles(), dec!(85));
        gateway.fail_orders = true;
        let mut coordinator = coordinator(gateway, false).await;

        assert!(coordinator.run_cycle("BTCUSDT").await.is_err());
        assert_eq!(coordinator.risk().open_exposure(), Decimal::ZERO);
        assert!(coordinator.ledger.open_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exposure_gate_rejects_without_mutation() {
        let gateway = MockGateway::new(falling_candles(), dec!(85));
        let calls = gateway.order_calls.clone();
        let mut coordinator = coordinator(gateway, false).await;

        // Fill the book to the ceiling: bankroll 1850 -> limit 1110
        coordinator
            .risk
            .open_position(Trade::open(
                "ETHUSDT".to_string(),
                TradeSide::Buy,
                dec!(100),
                dec!(11),
                dec!(1100),
                dec!(98),
                dec!(104),
                "seed".to_string(),
            ))
            .unwrap();

        let outcome = coordinator.run_cycle("BTCUSDT").await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Rejected { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!coordinator.risk().has_open_position("BTCUSDT"));
    }

    #[tokio::test]
    async fn close_position_realizes_pnl_and_persists() {
        let gateway = MockGateway::new(falling_candles(), dec!(85));
        let mut coordinator = coordinator(gateway, false).await;

        coordinator.run_cycle("BTCUSDT").await.unwrap();

        // Exit at the mock's last price (same as fill) -> flat pnl
        let pnl = coordinator.close_position("BTCUSDT", None).await.unwrap();
        assert_eq!(pnl, Decimal::ZERO);
        assert!(!coordinator.risk().has_open_position("BTCUSDT"));
        assert_eq!(coordinator.ledger.closed_trades().await.unwrap().len(), 1);

        // Closing again is an error
        assert!(coordinator.close_position("BTCUSDT", None).await.is_err());
    }

    #[tokio::test]
    async fn bankroll_floor_halts_the_cycle() {
        let gateway = MockGateway::new(falling_candles(), dec!(85));
        let mut coordinator = coordinator(gateway, false).await;

        coordinator
            .risk
            .open_position(Trade::open(
                "ETHUSDT".to_string(),
                TradeSide::Buy,
                dec!(100),
                dec!(20),
                dec!(2000),
                dec!(98),
                dec!(104),
                "seed".to_string(),
            ))
            .unwrap();
        coordinator.risk.close_trade("ETHUSDT", dec!(14)).unwrap();

        let outcome = coordinator.run_cycle("BTCUSDT").await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Halted));
    }
}
