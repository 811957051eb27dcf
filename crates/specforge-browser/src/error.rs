use specforge_core::FailureKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to connect to browser endpoint: {0}")]
    Connect(String),

    #[error("failed to launch local browser: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("failed to read page content: {0}")]
    Content(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("session already closed")]
    Closed,

    #[error("chromium error: {0}")]
    Chromium(String),
}

impl BrowserError {
    /// Classification used when the error reaches a job.
    ///
    /// A malformed endpoint never heals by retrying; everything else is a
    /// proxy or network hiccup.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::InvalidUrl(_) => FailureKind::Configuration,
            Self::Timeout(_) => FailureKind::Validation,
            _ => FailureKind::Transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::Navigation("net::ERR_TUNNEL_CONNECTION_FAILED".to_string());
        assert_eq!(
            err.to_string(),
            "navigation failed: net::ERR_TUNNEL_CONNECTION_FAILED"
        );
    }

    #[test]
    fn test_failure_kind() {
        assert_eq!(
            BrowserError::Connect("refused".into()).failure_kind(),
            FailureKind::Transport
        );
        assert_eq!(
            BrowserError::Timeout("navigation".into()).failure_kind(),
            FailureKind::Validation
        );
        assert_eq!(
            BrowserError::InvalidUrl("::".into()).failure_kind(),
            FailureKind::Configuration
        );
        assert!(BrowserError::Closed.failure_kind().is_retryable());
    }
}
