//! Error types for repository backends.

use thiserror::Error;

/// Convenient alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Row addressed by id/key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// History insert lost the optimistic version race.
    #[error("history version conflict on canonical {canonical_id}: version {version} taken")]
    VersionConflict { canonical_id: i64, version: i64 },

    /// Canonical slug already owned by another row.
    #[error("slug conflict: {0}")]
    SlugConflict(String),

    /// Backend deadline expired; retryable.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Backend throttled the call; retryable.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Transient faults are retried with backoff; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::RateLimited(_))
    }
}
