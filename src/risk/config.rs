//! Risk management configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for bankroll and exposure management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Starting bankroll in USD
    pub bankroll_usd: Decimal,

    /// Bankroll divisor yielding the hard per-position size cap
    /// (50 = 2% of bankroll, 60 = 1.67%)
    pub risk_multiplier: u32,

    /// Portfolio-level circuit breaker: open exposure may never exceed
    /// this fraction of the bankroll
    pub exposure_ceiling_fraction: Decimal,

    /// Trading halts when the bankroll falls below this fraction of
    /// the starting bankroll
    pub min_bankroll_fraction: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            bankroll_usd: dec!(1850),
            risk_multiplier: 50,              // 2% per-position cap
            exposure_ceiling_fraction: dec!(0.6),
            min_bankroll_fraction: dec!(0.1), // halt below 10% of start
        }
    }
}

impl RiskConfig {
    /// Default config with the bankroll taken from `BANKROLL_USD` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("BANKROLL_USD") {
            if let Ok(value) = raw.parse::<Decimal>() {
                config.bankroll_usd = value;
            }
        }
        config
    }
}
