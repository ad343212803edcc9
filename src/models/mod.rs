//! Data models for price bars, signals, sizing, and trades.

mod candle;
mod signal;
mod sizing;
mod trade;

pub use candle::{closes, Candle};
pub use signal::{Signal, SignalAction};
pub use sizing::PositionSizing;
pub use trade::{Trade, TradeSide};
