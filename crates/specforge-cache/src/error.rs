//! Cache error types.

use specforge_db::DatabaseError;
use thiserror::Error;

/// Errors from the cache and normalization layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Persistence failure
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Transaction plumbing failure
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A stored or submitted payload has an unusable shape
    #[error("invalid payload: {0}")]
    Payload(String),

    /// Unknown normalization pass name
    #[error("unknown normalization pass '{0}'")]
    UnknownPass(String),

    /// Nothing cached for the requested key
    #[error("no cached data for {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
