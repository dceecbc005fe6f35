//! Fatal error type for the optimizer.
//!
//! Only configuration-time problems are fatal: they are raised before the
//! first step and no partial result is returned. Everything that goes wrong
//! inside a step (executor failures, timeouts, metric errors, instruction
//! generator errors) is encoded as a failed result and folded into run
//! statistics instead of propagating as an error.

/// Error returned by [`crate::Optimizer::run`].
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
