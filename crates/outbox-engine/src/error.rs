//! Engine error types.

use thiserror::Error;

/// Engine error type.
///
/// Per-item delivery failures never surface here; they are absorbed into the
/// item's stored status. Only cycle-level failures (store unavailable, client
/// construction) propagate to the caller.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] outbox_database::DatabaseError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
