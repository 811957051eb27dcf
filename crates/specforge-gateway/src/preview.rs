//! One-off scrapes outside the job queue.
//!
//! `preview` runs the executor once and hands the extracted page back to
//! the caller. `create-from-preview` turns a page the caller accepted into
//! a catalog device and its cached payloads.

use crate::error::{GatewayError, Result};
use serde::Serialize;
use specforge_cache::CacheStore;
use specforge_core::{DeviceId, SlugConflict, SourceConfig};
use specforge_db::{Catalog, NewDevice};
use specforge_scraper::{DevicePage, NoopProgress, ScrapeExecutor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Extracted page for a target.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    /// Target that was scraped
    pub target_id: String,
    /// Extracted payload
    pub payload: DevicePage,
}

/// Device created from a preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedDevice {
    /// Derived device id
    pub device_id: String,
    /// Display name
    pub name: String,
}

/// Runs previews and creates devices from them.
pub struct Previewer {
    executor: Arc<ScrapeExecutor>,
    catalog: Arc<dyn Catalog>,
    cache: CacheStore,
    source: SourceConfig,
}

impl Previewer {
    /// Create a previewer.
    #[must_use]
    pub fn new(
        executor: Arc<ScrapeExecutor>,
        catalog: Arc<dyn Catalog>,
        cache: CacheStore,
        source: SourceConfig,
    ) -> Self {
        Self {
            executor,
            catalog,
            cache,
            source,
        }
    }

    /// Scrape `target_id` once, without a job.
    pub async fn preview(&self, target_id: &str, cancel: &CancellationToken) -> Result<Preview> {
        let target_id = clean_target(target_id)?;
        let url = self.source.device_url(target_id);
        tracing::debug!("Previewing {}", url);

        let payload = self.executor.execute(&url, &NoopProgress, cancel).await?;
        Ok(Preview {
            target_id: target_id.to_string(),
            payload,
        })
    }

    /// Create the catalog device for `target_id` and cache `payload` for it.
    pub async fn create_from_preview(
        &self,
        target_id: &str,
        payload: &DevicePage,
    ) -> Result<CreatedDevice> {
        let target_id = clean_target(target_id)?;
        if payload.name.trim().is_empty() {
            return Err(GatewayError::InvalidParams(
                "payload.name must not be empty".to_string(),
            ));
        }

        let device_id = DeviceId::from_slug(&self.source.name, target_id);
        if let Some(owner) = self.catalog.find_by_slug(target_id).await? {
            if owner.id != device_id.as_str() {
                return Err(GatewayError::PreviewConflict(SlugConflict {
                    target_id: target_id.to_string(),
                    existing_device_id: owner.id,
                    existing_device_name: owner.name,
                }));
            }
        }

        let device = self
            .catalog
            .create_device(NewDevice {
                id: device_id.to_string(),
                slug: target_id.to_string(),
                name: payload.name.clone(),
                brand: payload.brand.clone(),
            })
            .await?;

        let url = self.source.device_url(target_id);
        self.cache
            .store_device_page(&device.id, target_id, &url, payload)
            .await?;

        tracing::info!("Created device {} from preview of {}", device.id, target_id);
        Ok(CreatedDevice {
            device_id: device.id,
            name: device.name,
        })
    }
}

fn clean_target(target_id: &str) -> Result<&str> {
    let target_id = target_id.trim();
    if target_id.is_empty() {
        return Err(GatewayError::InvalidParams(
            "targetId must not be empty".to_string(),
        ));
    }
    Ok(target_id)
}
