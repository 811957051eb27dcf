//! Wire frames.
//!
//! Every frame is one JSON object on its own line:
//!
//! ```text
//! -> {"id":"1","method":"scrape","params":{"targetId":"google_pixel_8-12546"}}
//! <- {"id":"1","result":{"id":"...","step":"searching",...}}
//! <- {"event":{"type":"progress","jobId":"...","stage":"navigating","percent":10,...}}
//! ```
//!
//! A request gets exactly one response carrying its `id`. Events are not
//! correlated by id; they carry the job id they describe.

use crate::error::{ErrorBody, GatewayError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use specforge_queue::JobEvent;

/// A decoded request line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    /// Caller-chosen correlation id
    pub id: String,
    /// Method name, e.g. `"search"`
    pub method: String,
    /// Method parameters; `null` when omitted
    #[serde(default)]
    pub params: Value,
}

/// The terminal frame for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Id of the request being answered; `null` when the line had none
    pub id: Option<String>,
    /// Handler output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Handler failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn err(id: Option<String>, error: impl Into<ErrorBody>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// An event pushed to a connection.
#[derive(Debug, Clone, Serialize)]
pub struct EventFrame<'a> {
    /// The job event
    pub event: &'a JobEvent,
}

/// Decode one request line.
///
/// On failure the request id is still recovered when the line is a JSON
/// object with a string `id`, so the caller can be answered in kind.
pub fn parse_request(line: &str) -> Result<Request, (Option<String>, GatewayError)> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| (None, GatewayError::InvalidParams(format!("malformed JSON: {e}"))))?;

    let id = value.get("id").and_then(Value::as_str).map(str::to_string);
    serde_json::from_value(value)
        .map_err(|e| (id, GatewayError::InvalidParams(format!("malformed request: {e}"))))
}

/// Encode a frame as one line, without the trailing newline.
pub fn encode<T: Serialize>(frame: &T) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!("Failed to encode frame: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let request =
            parse_request(r#"{"id":"7","method":"get-job","params":{"jobId":"j1"}}"#)
                .expect("parse");
        assert_eq!(request.id, "7");
        assert_eq!(request.method, "get-job");
        assert_eq!(request.params, json!({ "jobId": "j1" }));
    }

    #[test]
    fn test_parse_request_without_params() {
        let request = parse_request(r#"{"id":"1","method":"health"}"#).expect("parse");
        assert!(request.params.is_null());
    }

    #[test]
    fn test_malformed_json_has_no_id() {
        let (id, err) = parse_request("{not json").expect_err("should fail");
        assert!(id.is_none());
        assert!(matches!(err, GatewayError::InvalidParams(_)));
    }

    #[test]
    fn test_missing_method_keeps_id() {
        let (id, err) = parse_request(r#"{"id":"9","params":{}}"#).expect_err("should fail");
        assert_eq!(id.as_deref(), Some("9"));
        assert!(err.to_string().contains("method"));
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let ok = serde_json::to_value(Response::ok("1", json!({ "status": "ok" })))
            .expect("serialize");
        assert_eq!(ok, json!({ "id": "1", "result": { "status": "ok" } }));

        let err = serde_json::to_value(Response::err(
            None,
            ErrorBody::new("INVALID_PARAMS", "bad"),
        ))
        .expect("serialize");
        assert_eq!(
            err,
            json!({ "id": null, "error": { "code": "INVALID_PARAMS", "message": "bad" } })
        );
    }

    #[test]
    fn test_event_frame_shape() {
        let event = JobEvent::Progress {
            job_id: "j1".into(),
            stage: "navigating".into(),
            percent: 10,
            message: "opening".into(),
        };
        let line = encode(&EventFrame { event: &event }).expect("encode");
        let value: Value = serde_json::from_str(&line).expect("json");
        assert_eq!(value["event"]["type"], "progress");
        assert_eq!(value["event"]["jobId"], "j1");
        assert_eq!(value["event"]["stage"], "navigating");
        assert_eq!(value["event"]["percent"], 10);
    }
}
