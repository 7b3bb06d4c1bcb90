//! Error types for rider-seal operations.

use thiserror::Error;

use crate::models::rider::SealState;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Postgres SQLSTATE codes that mean "the atomic check-then-act lost a race".
const RETRYABLE_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "23505", // unique_violation (active dedup key index)
];

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected before any mutation
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Rider or job not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Seal lifecycle forbids the requested move
    #[error("Seal transition denied: {from} -> {to}")]
    TransitionDenied { from: SealState, to: SealState },

    /// State-dependent rule rejected the operation, state unchanged
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Actor may not perform this operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The atomic check-then-act failed or raced; retry the whole operation
    #[error("Storage transaction failed: {0}")]
    TransactionFailed(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation may be retried as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransactionFailed(_))
    }

    /// Whether this is a precondition-class failure (includes denied transitions).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::PreconditionFailed(_) | Error::TransitionDenied { .. }
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        let retryable = e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref()))
            .unwrap_or(false);

        if retryable {
            Error::TransactionFailed(e.to_string())
        } else if matches!(e, sqlx::Error::PoolTimedOut) {
            Error::TransactionFailed("connection pool timed out".to_string())
        } else {
            Error::Database(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {e}"))
    }
}
