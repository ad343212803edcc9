//! Position sizing derived from a signal and the account state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Deterministic sizing output for one signal. Monetary fields are
/// rounded to 2 decimal places and token quantities to 6, at this
/// boundary only; internal computation stays unrounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizing {
    /// Position notional in USD, never above the per-position cap
    pub position_size_usd: Decimal,

    /// Position size in base-asset tokens
    pub position_size_tokens: Decimal,

    /// Capital placed at risk for this trade
    pub risk_usd: Decimal,

    /// Distance from entry to stop as a percentage of entry
    pub stop_loss_distance_pct: Decimal,

    /// Worst-case loss if the stop is hit
    pub max_loss_usd: Decimal,
}

impl PositionSizing {
    /// Apply the display/ledger rounding convention.
    pub fn rounded(self) -> Self {
        Self {
            position_size_usd: self.position_size_usd.round_dp(2),
            position_size_tokens: self.position_size_tokens.round_dp(6),
            risk_usd: self.risk_usd.round_dp(2),
            stop_loss_distance_pct: self.stop_loss_distance_pct.round_dp(2),
            max_loss_usd: self.max_loss_usd.round_dp(2),
        }
    }
}
