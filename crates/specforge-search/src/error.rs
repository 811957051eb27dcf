//! Search error types.

use specforge_core::FailureKind;
use thiserror::Error;

/// Errors from the search & match pipeline.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Network failure before a response arrived
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream answered with an error status
    #[error("upstream returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    Parse(String),

    /// Every attempt failed with a retryable error
    #[error("search failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: String,
    },

    /// Oracle call failed
    #[error("oracle error: {0}")]
    Oracle(String),

    /// Invalid source configuration
    #[error("invalid search configuration: {0}")]
    Config(String),

    /// Cancelled while waiting or in flight
    #[error("search cancelled")]
    Cancelled,
}

impl SearchError {
    /// Whether another attempt may succeed.
    ///
    /// Transport failures, 5xx and 429 are retried; other statuses and
    /// malformed bodies are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Classification used when the error reaches a job.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Parse(_) | Self::Status { .. } => FailureKind::Parse,
            Self::Config(_) => FailureKind::Configuration,
            Self::Transport(_) | Self::Exhausted { .. } | Self::Oracle(_) | Self::Cancelled => {
                FailureKind::Transport
            }
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;
