//! Execution gateway: explicit per-venue capability interface.
//!
//! Each supported venue implements [`ExchangeGateway`]; asking for an
//! unsupported venue fails at construction, not at first call.

mod bybit;
mod types;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::{Candle, TradeSide};

pub use bybit::BybitGateway;

/// Supported trading venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Bybit,
}

impl Venue {
    pub fn parse(name: &str) -> Result<Self, PipelineError> {
        match name.to_lowercase().as_str() {
            "bybit" => Ok(Venue::Bybit),
            other => Err(PipelineError::configuration(format!(
                "venue '{other}' is not supported (supported: bybit)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Bybit => "bybit",
        }
    }
}

/// Confirmed (or simulated) order execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    /// Exchange confirmation identifier
    pub order_id: String,

    /// Fill price; a simulated result carries the reference price
    pub fill_price: Decimal,

    /// True when no outbound call was made
    pub dry_run: bool,
}

/// One coin's balance on the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinBalance {
    pub coin: String,
    pub total: Decimal,
    pub available: Decimal,
}

/// Capability interface every venue must provide.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn venue(&self) -> Venue;

    /// Last traded price for a symbol.
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, PipelineError>;

    /// Ordered bar sequence, newest last.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, PipelineError>;

    /// Account balances; requires API credentials.
    async fn fetch_balance(&self) -> Result<Vec<CoinBalance>, PipelineError>;

    /// Submit a market order. Attempted exactly once; a definite
    /// success must expose both a fill price and a confirmation id.
    async fn submit_order(
        &self,
        symbol: &str,
        side: TradeSide,
        amount: Decimal,
    ) -> Result<OrderResult, PipelineError>;
}

/// Construct the gateway for a venue name.
pub fn connect(venue: &str) -> Result<Box<dyn ExchangeGateway>, PipelineError> {
    match Venue::parse(venue)? {
        Venue::Bybit => Ok(Box::new(BybitGateway::from_env()?)),
    }
}
