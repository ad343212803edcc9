//! Trade record: opened by the coordinator, finalized at close,
//! appended to the ledger and never removed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(TradeSide::Buy),
            "sell" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// One position from entry to (eventual) exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Trading pair (e.g. "BTCUSDT")
    pub symbol: String,

    pub side: TradeSide,

    pub entry_price: Decimal,

    /// Absent while the position is open
    pub exit_price: Option<Decimal>,

    /// Position size in base-asset tokens
    pub size_tokens: Decimal,

    /// Position notional in USD at entry
    pub size_usd: Decimal,

    pub stop_loss: Decimal,
    pub take_profit: Decimal,

    /// Realized profit/loss, computed at close
    pub pnl: Option<Decimal>,

    /// Exchange order id
    pub order_id: String,

    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// Open a new trade at the given fill.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: String,
        side: TradeSide,
        entry_price: Decimal,
        size_tokens: Decimal,
        size_usd: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        order_id: String,
    ) -> Self {
        Self {
            symbol,
            side,
            entry_price,
            exit_price: None,
            size_tokens,
            size_usd,
            stop_loss,
            take_profit,
            pnl: None,
            order_id,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit_price.is_none()
    }

    /// Profit/loss if the position were closed at `exit_price`.
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        match self.side {
            TradeSide::Buy => (exit_price - self.entry_price) * self.size_tokens,
            TradeSide::Sell => (self.entry_price - exit_price) * self.size_tokens,
        }
    }

    /// Finalize the trade at `exit_price`. Returns the realized pnl.
    pub fn close(&mut self, exit_price: Decimal) -> Decimal {
        let pnl = self.pnl_at(exit_price);
        self.exit_price = Some(exit_price);
        self.pnl = Some(pnl);
        self.closed_at = Some(Utc::now());
        pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(side: TradeSide) -> Trade {
        Trade::open(
            "BTCUSDT".to_string(),
            side,
            dec!(100),
            dec!(2),
            dec!(200),
            dec!(98),
            dec!(104),
            "test-order".to_string(),
        )
    }

    #[test]
    fn buy_pnl_round_trip() {
        let mut trade = sample(TradeSide::Buy);
        assert!(trade.is_open());

        let pnl = trade.close(dec!(110));
        assert_eq!(pnl, dec!(20)); // (110 - 100) * 2
        assert_eq!(trade.pnl, Some(dec!(20)));
        assert!(!trade.is_open());
    }

    #[test]
    fn sell_pnl_round_trip() {
        let mut trade = sample(TradeSide::Sell);

        let pnl = trade.close(dec!(110));
        assert_eq!(pnl, dec!(-20)); // (100 - 110) * 2
    }

    #[test]
    fn pnl_at_does_not_finalize() {
        let trade = sample(TradeSide::Buy);
        assert_eq!(trade.pnl_at(dec!(90)), dec!(-20));
        assert!(trade.is_open());
        assert_eq!(trade.pnl, None);
    }
}
