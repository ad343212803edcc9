//! Signal generation.

mod rsi;

pub use rsi::{rsi, RsiStrategy, SignalConfig};
