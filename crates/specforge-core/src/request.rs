//! What a caller asks for and what search hands back.

use serde::{Deserialize, Serialize};

/// A scrape request as admitted by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScrapeRequest {
    /// Resolve a free-text device name first
    Search {
        /// Device name as typed by the caller
        query: String,
        /// Optional brand hint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        brand: Option<String>,
    },
    /// Scrape a known canonical target directly
    Target {
        /// Source-specific canonical slug
        #[serde(rename = "targetId")]
        target_id: String,
    },
}

impl ScrapeRequest {
    /// The canonical target, when the request already names one.
    #[must_use]
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Self::Target { target_id } => Some(target_id),
            Self::Search { .. } => None,
        }
    }
}

/// One search result, de-duplicated by `target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Display name
    pub name: String,
    /// Source-specific canonical slug
    pub target_id: String,
    /// Device page on the source
    pub source_url: String,
}

/// Why a confirmed target could not be scraped for the requesting device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlugConflict {
    /// Target the caller confirmed
    pub target_id: String,
    /// Catalog device that already owns the target
    pub existing_device_id: String,
    /// Name of that device
    pub existing_device_name: String,
}
