//! Network-level resource blocking.
//!
//! Requests are paused by the Fetch domain at the request stage. Heavy,
//! non-essential resource types are failed with `BlockedByClient`;
//! documents, scripts, XHR and fetch continue untouched.

use crate::error::{BrowserError, Result};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

/// Whether a paused request of this type is aborted.
#[must_use]
pub fn should_block(resource_type: &ResourceType) -> bool {
    matches!(
        resource_type,
        ResourceType::Image | ResourceType::Font | ResourceType::Media | ResourceType::Stylesheet
    )
}

/// Enable request interception on `page` and spawn the task answering it.
///
/// The listener is registered before interception is enabled so no paused
/// request can slip past unanswered. The returned handle must be aborted
/// when the session closes.
pub async fn install_resource_blocking(page: &Page) -> Result<JoinHandle<()>> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| BrowserError::Chromium(format!("request listener: {e}")))?;

    page.execute(EnableParams {
        patterns: Some(vec![RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: None,
            request_stage: Some(RequestStage::Request),
        }]),
        handle_auth_requests: None,
    })
    .await
    .map_err(|e| BrowserError::Chromium(format!("enable interception: {e}")))?;

    let page = page.clone();
    let task = tokio::spawn(async move {
        let mut blocked = 0_u64;
        while let Some(event) = paused.next().await {
            let answer = if should_block(&event.resource_type) {
                blocked += 1;
                page.execute(FailRequestParams::new(
                    event.request_id.clone(),
                    ErrorReason::BlockedByClient,
                ))
                .await
                .map(|_| ())
            } else {
                page.execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            };

            // The page may already be gone when the session is closing
            if let Err(e) = answer {
                tracing::trace!("Dropped paused request {:?}: {}", event.request_id, e);
            }
        }
        tracing::debug!("Request interception ended, {} requests blocked", blocked);
    });

    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_heavy_resources() {
        for kind in [
            ResourceType::Image,
            ResourceType::Font,
            ResourceType::Media,
            ResourceType::Stylesheet,
        ] {
            assert!(should_block(&kind), "{kind:?} should be blocked");
        }
    }

    #[test]
    fn test_passes_essential_resources() {
        for kind in [
            ResourceType::Document,
            ResourceType::Script,
            ResourceType::Xhr,
            ResourceType::Fetch,
        ] {
            assert!(!should_block(&kind), "{kind:?} should pass through");
        }
    }
}
