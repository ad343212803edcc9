//! Bankroll, sizing, and exposure management.

mod config;
mod manager;

pub use config::RiskConfig;
pub use manager::{Account, PerformanceStats, RiskManager};
