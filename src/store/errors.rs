//! Store error categories and the retry classifier.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors, reduced to a closed set of categories.
///
/// Concrete backends map their own error representation onto these
/// categories; retry decisions are made against the category alone via
/// [`StoreError::is_retryable`], never against a backend-specific code.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend temporarily unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its deadline
    #[error("store deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Backend out of capacity (pool, quota, disk)
    #[error("store resources exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation aborted by the backend (serialization failure, deadlock)
    #[error("store operation aborted: {0}")]
    Aborted(String),

    /// Unclassified backend failure
    #[error("internal store error: {0}")]
    Internal(String),

    /// Record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// Conditional write lost to a concurrent update
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// Caller supplied an argument the backend rejects
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Whether a retry of the same operation may succeed.
    ///
    /// Transient categories are retryable; semantic failures
    /// (missing records, lost conditional writes, bad input) are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::DeadlineExceeded(_)
                | StoreError::ResourceExhausted(_)
                | StoreError::Aborted(_)
                | StoreError::Internal(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut => StoreError::DeadlineExceeded(err.to_string()),
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(ref db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Aborted(err.to_string()),
                // insufficient_resources class
                Some(code) if code.starts_with("53") => {
                    StoreError::ResourceExhausted(err.to_string())
                }
                // unique_violation
                Some("23505") => StoreError::Conflict(err.to_string()),
                _ => StoreError::Internal(err.to_string()),
            },
            _ => StoreError::Internal(err.to_string()),
        }
    }
}
