//! Crate-wide error hierarchy for the dedup engine.

use catalog_store::StoreError;
use thiserror::Error;

/// Convenient alias for engine-wide results.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Repository failure that survived the retry budget.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The cancellation flag fired; the job finalizes as failed with
    /// `error_message = "cancelled"`.
    #[error("cancelled")]
    Cancelled,

    /// Consecutive-error circuit breaker tripped.
    #[error("circuit breaker tripped in {phase} after {count} consecutive errors")]
    CircuitBroken { phase: &'static str, count: u32 },

    /// Invariant violation that retry-once could not resolve.
    #[error("consistency error: {0}")]
    Consistency(String),
}
