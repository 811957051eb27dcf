//! Scrape error types.

use crate::validator::RejectionKind;
use specforge_browser::BrowserError;
use specforge_core::FailureKind;
use std::time::Duration;
use thiserror::Error;

/// Errors from one scrape attempt.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The content validator rejected the page
    #[error("page rejected ({kind}): {reason}")]
    Rejected {
        /// Rejection class
        kind: RejectionKind,
        /// Human-readable reason
        reason: String,
    },

    /// A stage exceeded its wall-clock budget
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        /// Stage that timed out
        stage: &'static str,
        /// Budget that was exceeded
        after: Duration,
    },

    /// The page passed validation but a required field was missing
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Target URL is unusable
    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    /// Browser session failure
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    /// The attempt was cancelled
    #[error("scrape cancelled")]
    Cancelled,
}

impl ScrapeError {
    /// Classification used when the error reaches a job.
    ///
    /// Rejections and timeouts count against the attempt budget the same
    /// way transport failures do.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Rejected { .. } | Self::Timeout { .. } | Self::Extraction(_) => {
                FailureKind::Validation
            }
            Self::InvalidTarget(_) => FailureKind::Configuration,
            Self::Browser(e) => e.failure_kind(),
            Self::Cancelled => FailureKind::Transport,
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled) && self.failure_kind().is_retryable()
    }
}

/// Result type alias for scrape operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let rejected = ScrapeError::Rejected {
            kind: RejectionKind::BotChallenge,
            reason: "cloudflare".into(),
        };
        assert_eq!(rejected.failure_kind(), FailureKind::Validation);
        assert!(rejected.is_retryable());

        let timeout = ScrapeError::Timeout {
            stage: "navigation",
            after: Duration::from_secs(30),
        };
        assert!(timeout.is_retryable());

        let browser = ScrapeError::Browser(BrowserError::Connect("refused".into()));
        assert_eq!(browser.failure_kind(), FailureKind::Transport);

        assert!(!ScrapeError::InvalidTarget("x".into()).is_retryable());
        assert!(!ScrapeError::Cancelled.is_retryable());
    }
}
