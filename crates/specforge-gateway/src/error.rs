//! Gateway error types and their wire representation.

use serde::Serialize;
use serde_json::Value;
use specforge_cache::CacheError;
use specforge_core::SlugConflict;
use specforge_db::DatabaseError;
use specforge_queue::QueueError;
use specforge_scraper::ScrapeError;
use thiserror::Error;

/// Errors raised while serving a request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No handler is registered under the method name
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    /// The request line or its params could not be decoded
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A preview's slug is already owned by a different device
    #[error("target {} already belongs to device {}", .0.target_id, .0.existing_device_id)]
    PreviewConflict(SlugConflict),

    /// Job queue failure
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Preview scrape failure
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    /// Cache write failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Catalog failure
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A handler result could not be encoded
    #[error("failed to encode result: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Serializable error carried in a response's `error` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    /// Stable identifier for client-side handling (e.g. `"SLUG_CONFLICT"`)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Structured context for the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    /// Create an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create an error body with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

impl From<GatewayError> for ErrorBody {
    fn from(err: GatewayError) -> Self {
        let message = err.to_string();
        match err {
            GatewayError::UnknownMethod(_) => Self::new("UNKNOWN_METHOD", message),
            GatewayError::InvalidParams(_) => Self::new("INVALID_PARAMS", message),
            GatewayError::PreviewConflict(conflict) => Self::with_details(
                "SLUG_CONFLICT",
                message,
                serde_json::json!({ "conflict": conflict }),
            ),
            GatewayError::Queue(err) => Self::from(err),
            GatewayError::Scrape(ScrapeError::InvalidTarget(_)) => {
                Self::new("INVALID_PARAMS", message)
            }
            GatewayError::Scrape(err) => Self::with_details(
                "INTERNAL",
                message,
                serde_json::json!({ "failureKind": err.failure_kind() }),
            ),
            GatewayError::Database(DatabaseError::Conflict(_)) => {
                Self::new("SLUG_CONFLICT", message)
            }
            GatewayError::Cache(_)
            | GatewayError::Database(_)
            | GatewayError::Serialization(_)
            | GatewayError::Io(_) => {
                tracing::error!("Request failed: {}", message);
                Self::new("INTERNAL", message)
            }
        }
    }
}

impl From<QueueError> for ErrorBody {
    fn from(err: QueueError) -> Self {
        let message = err.to_string();
        match err {
            QueueError::DuplicateActiveJob {
                device_id,
                existing_job_id,
            } => Self::with_details(
                "DUPLICATE_ACTIVE_JOB",
                message,
                serde_json::json!({ "deviceId": device_id, "existingJobId": existing_job_id }),
            ),
            QueueError::SlugConflict { conflict, job } => Self::with_details(
                "SLUG_CONFLICT",
                message,
                serde_json::json!({ "job": job, "conflict": conflict }),
            ),
            QueueError::NotFound(job_id) => Self::with_details(
                "NOT_FOUND",
                message,
                serde_json::json!({ "jobId": job_id }),
            ),
            QueueError::InvalidState { job_id, step, .. } => Self::with_details(
                "INVALID_STATE",
                message,
                serde_json::json!({ "jobId": job_id, "step": step.as_str() }),
            ),
            QueueError::InvalidRequest(_) => Self::new("INVALID_PARAMS", message),
            QueueError::Database(_) | QueueError::Cache(_) => {
                tracing::error!("Queue operation failed: {}", message);
                Self::new("INTERNAL", message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specforge_core::JobStep;

    #[test]
    fn test_error_body_new() {
        let body = ErrorBody::new("TEST_CODE", "Test message");
        assert_eq!(body.code, "TEST_CODE");
        assert_eq!(body.message, "Test message");
        assert!(body.details.is_none());
    }

    #[test]
    fn test_error_body_skips_empty_details() {
        let json = serde_json::to_value(ErrorBody::new("NOT_FOUND", "gone")).expect("serialize");
        assert_eq!(json, serde_json::json!({ "code": "NOT_FOUND", "message": "gone" }));
    }

    #[test]
    fn test_duplicate_active_job_code() {
        let body = ErrorBody::from(GatewayError::Queue(QueueError::DuplicateActiveJob {
            device_id: "dev-1".into(),
            existing_job_id: Some("job-1".into()),
        }));
        assert_eq!(body.code, "DUPLICATE_ACTIVE_JOB");
        assert_eq!(body.message, "device dev-1 already has an active job");
        assert_eq!(
            body.details,
            Some(serde_json::json!({ "deviceId": "dev-1", "existingJobId": "job-1" }))
        );
    }

    #[test]
    fn test_invalid_state_code() {
        let body = ErrorBody::from(QueueError::InvalidState {
            job_id: "job-1".into(),
            step: JobStep::Done,
            action: "cancel",
        });
        assert_eq!(body.code, "INVALID_STATE");
        assert_eq!(body.message, "job job-1 is done; cannot cancel");
    }

    #[test]
    fn test_method_and_params_codes() {
        assert_eq!(
            ErrorBody::from(GatewayError::UnknownMethod("nope".into())).code,
            "UNKNOWN_METHOD"
        );
        assert_eq!(
            ErrorBody::from(GatewayError::InvalidParams("missing field".into())).code,
            "INVALID_PARAMS"
        );
        assert_eq!(
            ErrorBody::from(QueueError::InvalidRequest("query is empty".into())).code,
            "INVALID_PARAMS"
        );
    }

    #[test]
    fn test_preview_conflict_carries_conflict() {
        let body = ErrorBody::from(GatewayError::PreviewConflict(SlugConflict {
            target_id: "google_pixel_8-12546".into(),
            existing_device_id: "dev-9".into(),
            existing_device_name: "Pixel 8".into(),
        }));
        assert_eq!(body.code, "SLUG_CONFLICT");
        let details = body.details.expect("details");
        assert_eq!(details["conflict"]["existingDeviceId"], "dev-9");
    }

    #[test]
    fn test_scrape_failures_carry_failure_kind() {
        let body = ErrorBody::from(GatewayError::Scrape(ScrapeError::Extraction(
            "no name".into(),
        )));
        assert_eq!(body.code, "INTERNAL");
        assert!(body.details.expect("details").get("failureKind").is_some());

        let body = ErrorBody::from(GatewayError::Scrape(ScrapeError::InvalidTarget(
            "not a url".into(),
        )));
        assert_eq!(body.code, "INVALID_PARAMS");
    }
}
