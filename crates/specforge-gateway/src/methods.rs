//! Method table and handlers.
//!
//! Method names resolve through a [`Router`] built once at startup; each
//! [`Method`] maps to one handler on [`Handlers`].

use crate::error::{GatewayError, Result};
use crate::preview::Previewer;
use crate::session::Session;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use specforge_core::{JobStep, ScrapeRequest};
use specforge_db::JobFilter;
use specforge_queue::JobQueue;
use specforge_scraper::DevicePage;
use std::collections::HashMap;
use std::sync::Arc;

/// User id recorded when a request does not name one.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Every method the gateway serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `health`
    Health,
    /// `search`
    Search,
    /// `scrape`
    Scrape,
    /// `confirm`
    Confirm,
    /// `preview`
    Preview,
    /// `create-from-preview`
    CreateFromPreview,
    /// `list-jobs`
    ListJobs,
    /// `get-job`
    GetJob,
    /// `get-queue-items`
    GetQueueItems,
    /// `cancel-job`
    CancelJob,
    /// `watch-job`
    WatchJob,
}

impl Method {
    /// All methods, in table order.
    pub const ALL: [Method; 11] = [
        Self::Health,
        Self::Search,
        Self::Scrape,
        Self::Confirm,
        Self::Preview,
        Self::CreateFromPreview,
        Self::ListJobs,
        Self::GetJob,
        Self::GetQueueItems,
        Self::CancelJob,
        Self::WatchJob,
    ];

    /// Wire name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Search => "search",
            Self::Scrape => "scrape",
            Self::Confirm => "confirm",
            Self::Preview => "preview",
            Self::CreateFromPreview => "create-from-preview",
            Self::ListJobs => "list-jobs",
            Self::GetJob => "get-job",
            Self::GetQueueItems => "get-queue-items",
            Self::CancelJob => "cancel-job",
            Self::WatchJob => "watch-job",
        }
    }
}

/// Method-name lookup table.
#[derive(Debug, Clone)]
pub struct Router {
    table: HashMap<&'static str, Method>,
}

impl Router {
    /// Build the table from [`Method::ALL`].
    #[must_use]
    pub fn new() -> Self {
        let table = Method::ALL
            .iter()
            .map(|method| (method.name(), *method))
            .collect();
        Self { table }
    }

    /// Resolve a wire name.
    pub fn resolve(&self, name: &str) -> Result<Method> {
        self.table
            .get(name)
            .copied()
            .ok_or_else(|| GatewayError::UnknownMethod(name.to_string()))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    query: String,
    brand: Option<String>,
    device_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeParams {
    target_id: String,
    device_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmParams {
    job_id: String,
    target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetParams {
    target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFromPreviewParams {
    target_id: String,
    payload: DevicePage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListJobsParams {
    step: Option<JobStep>,
    device_id: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobParams {
    job_id: String,
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T> {
    let value = if value.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|e| GatewayError::InvalidParams(e.to_string()))
}

fn to_result(value: &impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Handler set shared by every connection.
pub struct Handlers {
    queue: Arc<JobQueue>,
    previewer: Previewer,
}

impl Handlers {
    /// Create the handler set.
    #[must_use]
    pub fn new(queue: Arc<JobQueue>, previewer: Previewer) -> Self {
        Self { queue, previewer }
    }

    /// The queue the handlers submit to.
    #[must_use]
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Run `method` with `params` on behalf of `session`.
    pub async fn call(
        &self,
        method: Method,
        params_value: Value,
        session: &Session,
    ) -> Result<Value> {
        match method {
            Method::Health => Ok(serde_json::json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
            })),
            Method::Search => {
                let p: SearchParams = params(params_value)?;
                let request = ScrapeRequest::Search {
                    query: p.query,
                    brand: p.brand,
                };
                self.submit(p.device_id.as_deref(), p.user_id.as_deref(), request, session)
                    .await
            }
            Method::Scrape => {
                let p: ScrapeParams = params(params_value)?;
                let request = ScrapeRequest::Target {
                    target_id: p.target_id,
                };
                self.submit(p.device_id.as_deref(), p.user_id.as_deref(), request, session)
                    .await
            }
            Method::Confirm => {
                let p: ConfirmParams = params(params_value)?;
                session.watch(&p.job_id);
                let job = self.queue.confirm(&p.job_id, &p.target_id).await?;
                to_result(&job)
            }
            Method::Preview => {
                let p: TargetParams = params(params_value)?;
                let preview = self
                    .previewer
                    .preview(&p.target_id, session.cancel_token())
                    .await?;
                to_result(&preview)
            }
            Method::CreateFromPreview => {
                let p: CreateFromPreviewParams = params(params_value)?;
                let created = self
                    .previewer
                    .create_from_preview(&p.target_id, &p.payload)
                    .await?;
                to_result(&created)
            }
            Method::ListJobs => {
                let p: ListJobsParams = params(params_value)?;
                let filter = JobFilter {
                    step: p.step,
                    device_id: p.device_id,
                    limit: p.limit,
                };
                let jobs = self.queue.list_jobs(&filter).await?;
                Ok(serde_json::json!({ "jobs": to_result(&jobs)? }))
            }
            Method::GetJob => {
                let p: JobParams = params(params_value)?;
                let job = self.queue.require_job(&p.job_id).await?;
                to_result(&job)
            }
            Method::GetQueueItems => {
                let p: JobParams = params(params_value)?;
                self.queue.require_job(&p.job_id).await?;
                let items = self.queue.queue_items(&p.job_id).await?;
                Ok(serde_json::json!({ "items": to_result(&items)? }))
            }
            Method::CancelJob => {
                let p: JobParams = params(params_value)?;
                let job = self.queue.cancel(&p.job_id).await?;
                to_result(&job)
            }
            Method::WatchJob => {
                let p: JobParams = params(params_value)?;
                let job = self.queue.require_job(&p.job_id).await?;
                session.watch(&job.id);
                Ok(serde_json::json!({ "watching": job.id }))
            }
        }
    }

    async fn submit(
        &self,
        device_id: Option<&str>,
        user_id: Option<&str>,
        request: ScrapeRequest,
        session: &Session,
    ) -> Result<Value> {
        let user_id = user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(ANONYMOUS_USER);
        let job = self
            .queue
            .enqueue_with(device_id, user_id, request, |job| session.watch(&job.id))
            .await?;
        to_result(&job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_resolves_every_method() {
        let router = Router::new();
        for method in Method::ALL {
            assert_eq!(router.resolve(method.name()).expect("resolve"), method);
        }
    }

    #[test]
    fn test_router_rejects_unknown_names() {
        let router = Router::new();
        assert!(matches!(
            router.resolve("delete-everything"),
            Err(GatewayError::UnknownMethod(name)) if name == "delete-everything"
        ));
        assert!(router.resolve("Search").is_err());
    }

    #[test]
    fn test_null_params_become_empty_object() {
        let p: ListJobsParams = params(Value::Null).expect("params");
        assert!(p.step.is_none());
        assert!(p.device_id.is_none());
        assert!(p.limit.is_none());
    }

    #[test]
    fn test_params_use_camel_case() {
        let p: SearchParams = params(serde_json::json!({
            "query": "pixel 8",
            "deviceId": "dev-1",
            "userId": "user-1"
        }))
        .expect("params");
        assert_eq!(p.query, "pixel 8");
        assert_eq!(p.device_id.as_deref(), Some("dev-1"));
        assert_eq!(p.user_id.as_deref(), Some("user-1"));
        assert!(p.brand.is_none());
    }

    #[test]
    fn test_missing_required_param() {
        let err = params::<ConfirmParams>(serde_json::json!({ "jobId": "j1" }))
            .expect_err("should fail");
        assert!(matches!(err, GatewayError::InvalidParams(msg) if msg.contains("targetId")));
    }

    #[test]
    fn test_list_jobs_step_filter() {
        let p: ListJobsParams =
            params(serde_json::json!({ "step": "slug_conflict", "limit": 5 })).expect("params");
        assert_eq!(p.step, Some(JobStep::SlugConflict));
        assert_eq!(p.limit, Some(5));
    }
}
