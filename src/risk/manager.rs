//! Risk manager: bankroll state, position sizing, exposure gating,
//! and the closed-trade ledger.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use statrs::statistics::Statistics;
use tracing::info;

use crate::error::PipelineError;
use crate::models::{PositionSizing, Signal, Trade};

use super::RiskConfig;

/// Risk capital state. Mutated only by closed-trade profit/loss.
#[derive(Debug, Clone)]
pub struct Account {
    /// Current bankroll in USD
    pub bankroll: Decimal,

    /// Bankroll at inception; fixed reference for ROI
    pub starting_bankroll: Decimal,

    /// Capital divided by this yields the per-position risk cap
    pub risk_multiplier: u32,
}

impl Account {
    pub fn new(bankroll: Decimal, risk_multiplier: u32) -> Self {
        Self {
            bankroll,
            starting_bankroll: bankroll,
            risk_multiplier,
        }
    }

    /// Hard cap on a single position's notional.
    pub fn max_position_size(&self) -> Decimal {
        self.bankroll / Decimal::from(self.risk_multiplier)
    }
}

/// Owns the account, the open-exposure map, and the trade ledger.
/// Single-writer: mutations happen only in `open_position` and
/// `close_trade`, each run to completion by one cycle at a time.
pub struct RiskManager {
    config: RiskConfig,
    account: Account,

    /// symbol -> open trade; committed USD per symbol
    open_positions: HashMap<String, Trade>,

    /// Append-only record of closed trades
    ledger: Vec<Trade>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        let account = Account::new(config.bankroll_usd, config.risk_multiplier);
        Self {
            config,
            account,
            open_positions: HashMap::new(),
            ledger: Vec::new(),
        }
    }

    /// Rebuild state from persisted trades (restore on startup). The
    /// bankroll passed in already reflects the ledger's closed pnl.
    pub fn restore(
        config: RiskConfig,
        bankroll: Decimal,
        starting_bankroll: Decimal,
        open: Vec<Trade>,
        closed: Vec<Trade>,
    ) -> Self {
        let account = Account {
            bankroll,
            starting_bankroll,
            risk_multiplier: config.risk_multiplier,
        };
        let open_positions = open.into_iter().map(|t| (t.symbol.clone(), t)).collect();
        Self {
            config,
            account,
            open_positions,
            ledger: closed,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Compute the position size for a signal under the risk constraints.
    ///
    /// With `risk_percent` unset the full per-position cap is placed at
    /// risk; otherwise `bankroll × risk_percent/100`. The resulting
    /// notional never exceeds the cap regardless of requested risk.
    pub fn size_position(
        &self,
        signal: &Signal,
        risk_percent: Option<Decimal>,
    ) -> Result<PositionSizing, PipelineError> {
        let entry = signal.reference_price;
        let stop = signal.stop_loss.ok_or_else(|| {
            PipelineError::configuration("signal carries no stop-loss to size against")
        })?;

        if entry <= Decimal::ZERO {
            return Err(PipelineError::configuration(format!(
                "non-positive entry price: {entry}"
            )));
        }
        if entry == stop {
            return Err(PipelineError::configuration(
                "stop-loss equals entry price; cannot derive risk distance",
            ));
        }

        let risk_usd = match risk_percent {
            None => self.account.max_position_size(),
            Some(pct) => self.account.bankroll * pct / dec!(100),
        };

        let price_risk_pct = (entry - stop).abs() / entry * dec!(100);

        let unconstrained = risk_usd / (price_risk_pct / dec!(100));
        let position_size_usd = unconstrained.min(self.account.max_position_size());
        let position_size_tokens = position_size_usd / entry;
        let max_loss_usd = position_size_usd * price_risk_pct / dec!(100);

        Ok(PositionSizing {
            position_size_usd,
            position_size_tokens,
            risk_usd,
            stop_loss_distance_pct: price_risk_pct,
            max_loss_usd,
        }
        .rounded())
    }

    /// Sum of committed USD across open positions.
    pub fn open_exposure(&self) -> Decimal {
        self.open_positions.values().map(|t| t.size_usd).sum()
    }

    /// Portfolio-level exposure ceiling in USD.
    pub fn exposure_limit(&self) -> Decimal {
        self.account.bankroll * self.config.exposure_ceiling_fraction
    }

    /// True iff a new position of `position_size_usd` keeps total open
    /// exposure at or under the ceiling.
    pub fn can_open(&self, position_size_usd: Decimal) -> bool {
        self.open_exposure() + position_size_usd <= self.exposure_limit()
    }

    /// Gate check with the rejection details attached.
    pub fn ensure_can_open(&self, position_size_usd: Decimal) -> Result<(), PipelineError> {
        if self.can_open(position_size_usd) {
            Ok(())
        } else {
            Err(PipelineError::ExposureExceeded {
                committed: self.open_exposure(),
                requested: position_size_usd,
                limit: self.exposure_limit(),
            })
        }
    }

    /// True when the bankroll has fallen below the configured floor.
    /// The coordinator skips cycles while halted.
    pub fn trading_halted(&self) -> bool {
        self.account.bankroll
            < self.account.starting_bankroll * self.config.min_bankroll_fraction
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.open_positions.contains_key(symbol)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Trade> {
        self.open_positions.values()
    }

    pub fn ledger(&self) -> &[Trade] {
        &self.ledger
    }

    /// Register an opened trade in the exposure map.
    pub fn open_position(&mut self, trade: Trade) -> Result<(), PipelineError> {
        if self.open_positions.contains_key(&trade.symbol) {
            return Err(PipelineError::configuration(format!(
                "position already open for {}",
                trade.symbol
            )));
        }
        self.open_positions.insert(trade.symbol.clone(), trade);
        Ok(())
    }

    /// Close the open position on `symbol` at `exit_price`.
    ///
    /// Side effects: bankroll moves by the realized pnl, the finalized
    /// trade is appended to the ledger, and its exposure is released.
    pub fn close_trade(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
    ) -> Result<Decimal, PipelineError> {
        let mut trade = self.open_positions.remove(symbol).ok_or_else(|| {
            PipelineError::configuration(format!("no open position for {symbol}"))
        })?;

        let pnl = trade.close(exit_price);
        self.account.bankroll += pnl;

        info!(
            symbol = %symbol,
            entry = %trade.entry_price,
            exit = %exit_price,
            pnl = %pnl.round_dp(2),
            bankroll = %self.account.bankroll.round_dp(2),
            "Trade closed"
        );

        self.ledger.push(trade);
        Ok(pnl)
    }

    /// Snapshot of cumulative performance since inception.
    pub fn performance_stats(&self) -> PerformanceStats {
        let pnls: Vec<Decimal> = self.ledger.iter().filter_map(|t| t.pnl).collect();

        let total_trades = pnls.len();
        let wins = pnls.iter().filter(|p| **p > Decimal::ZERO).count();
        let losses = total_trades - wins;

        let total_pnl: Decimal = pnls.iter().copied().sum();
        let win_rate = if total_trades > 0 {
            (wins as f64 / total_trades as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        // ROI against the fixed starting capital, not the current bankroll
        let roi = if self.account.starting_bankroll > Decimal::ZERO {
            (total_pnl / self.account.starting_bankroll * dec!(100)).round_dp(2)
        } else {
            Decimal::ZERO
        };

        PerformanceStats {
            total_trades,
            wins,
            losses,
            win_rate,
            total_pnl: total_pnl.round_dp(2),
            current_bankroll: self.account.bankroll.round_dp(2),
            roi,
            sharpe_ratio: sharpe(&pnls),
        }
    }
}

/// Sharpe ratio over a pnl series, annualized assuming daily closes.
fn sharpe(pnls: &[Decimal]) -> Option<f64> {
    if pnls.len() < 2 {
        return None;
    }

    let returns: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
    let mean = returns.clone().mean();
    let std_dev = returns.std_dev();

    if std_dev > 0.0 {
        Some(mean / std_dev * 365.0_f64.sqrt())
    } else {
        None
    }
}

/// Performance report consumable by any reporting collaborator.
#[derive(Debug, Clone)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub current_bankroll: Decimal,
    pub roi: Decimal,
    pub sharpe_ratio: Option<f64>,
}

impl std::fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Performance ===")?;
        writeln!(f, "Total Trades:    {}", self.total_trades)?;
        writeln!(f, "Wins / Losses:   {} / {}", self.wins, self.losses)?;
        writeln!(f, "Win Rate:        {:.2}%", self.win_rate)?;
        writeln!(f, "Total PnL:       ${:+.2}", self.total_pnl)?;
        writeln!(f, "Bankroll:        ${:.2}", self.current_bankroll)?;
        writeln!(f, "ROI:             {:+.2}%", self.roi)?;
        if let Some(sharpe) = self.sharpe_ratio {
            writeln!(f, "Sharpe Ratio:    {:.2}", sharpe)?;
        }
        Ok(())
    }
}
