//! Queue error types.

use specforge_cache::CacheError;
use specforge_core::{FailureKind, JobStep, SlugConflict};
use specforge_db::{DatabaseError, ScrapeJob};
use thiserror::Error;

/// Errors from the job queue service.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The device already has a non-terminal job
    #[error("device {device_id} already has an active job")]
    DuplicateActiveJob {
        /// Device the caller asked for
        device_id: String,
        /// The job that is already running, when it could still be read
        existing_job_id: Option<String>,
    },

    /// The confirmed target belongs to another device; the job is now
    /// `slug_conflict`
    #[error("target {} already belongs to device {}", .conflict.target_id, .conflict.existing_device_id)]
    SlugConflict {
        /// Conflict details
        conflict: SlugConflict,
        /// The job as persisted in `slug_conflict`
        job: Box<ScrapeJob>,
    },

    /// No job with that id
    #[error("job '{0}' not found")]
    NotFound(String),

    /// The operation does not apply to the job's current step
    #[error("job {job_id} is {step}; cannot {action}")]
    InvalidState {
        /// Job id
        job_id: String,
        /// Step the job is in
        step: JobStep,
        /// What the caller tried to do
        action: &'static str,
    },

    /// Caller input rejected before touching storage
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Persistence failure
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Cache write failure
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl QueueError {
    /// Classification used when the error reaches a caller.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::DuplicateActiveJob { .. } | Self::SlugConflict { .. } => FailureKind::Conflict,
            Self::NotFound(_) | Self::InvalidState { .. } | Self::InvalidRequest(_) => {
                FailureKind::Parse
            }
            Self::Database(_) | Self::Cache(_) => FailureKind::Transport,
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(DatabaseError::from(e))
    }
}

impl From<specforge_core::SpecforgeError> for QueueError {
    fn from(e: specforge_core::SpecforgeError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_are_not_retryable() {
        let err = QueueError::DuplicateActiveJob {
            device_id: "dev-1".into(),
            existing_job_id: Some("job-1".into()),
        };
        assert_eq!(err.failure_kind(), FailureKind::Conflict);
        assert!(!err.failure_kind().is_retryable());
        assert_eq!(err.to_string(), "device dev-1 already has an active job");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = QueueError::InvalidState {
            job_id: "job-1".into(),
            step: JobStep::Done,
            action: "confirm a candidate",
        };
        assert_eq!(err.to_string(), "job job-1 is done; cannot confirm a candidate");
    }
}
