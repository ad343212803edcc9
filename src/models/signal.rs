//! Trade signal produced by the signal generator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Recommended action for the current evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Wait,
    Buy,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Wait => "WAIT",
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
        }
    }
}

/// Result of one evaluation cycle. Created fresh per cycle and
/// immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Trading pair (e.g. "BTCUSDT")
    pub symbol: String,

    /// Bar timeframe the signal was computed on (e.g. "1h")
    pub timeframe: String,

    pub action: SignalAction,

    /// RSI value in [0, 100]
    pub rsi: f64,

    /// Close of the most recent bar; the proposed entry price
    pub reference_price: Decimal,

    /// Proposed stop-loss; None for WAIT
    pub stop_loss: Option<Decimal>,

    /// Proposed take-profit; None for WAIT
    pub take_profit: Option<Decimal>,

    /// Human-readable justification
    pub reason: String,
}

impl Signal {
    /// A neutral WAIT signal with the given reason.
    pub fn wait(symbol: &str, timeframe: &str, rsi: f64, price: Decimal, reason: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            action: SignalAction::Wait,
            rsi,
            reference_price: price,
            stop_loss: None,
            take_profit: None,
            reason,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != SignalAction::Wait
    }
}
