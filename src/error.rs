//! Pipeline error kinds.
//!
//! None of these are fatal to the process: every failure degrades to
//! "no action this cycle" and is surfaced through the cycle logs.

use thiserror::Error;

/// Errors produced by the decision pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Degenerate or invalid configuration, e.g. a stop-loss equal to
    /// the entry price (zero-division risk) or an unsupported venue.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The portfolio-level exposure ceiling would be breached.
    #[error("exposure ceiling exceeded: committed ${committed} + requested ${requested} > limit ${limit}")]
    ExposureExceeded {
        committed: rust_decimal::Decimal,
        requested: rust_decimal::Decimal,
        limit: rust_decimal::Decimal,
    },

    /// The execution gateway failed or returned an unusable result.
    /// The cycle aborts without mutating risk state; the caller may
    /// retry on its next scheduled cycle.
    #[error("gateway failure: {0}")]
    Gateway(String),
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }
}
