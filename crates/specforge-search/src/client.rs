//! HTTP client for the external device catalog.

use crate::error::{Result, SearchError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use specforge_core::{SearchConfig, SourceConfig};
use std::time::Duration;

/// One raw hit from search or enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceHit {
    /// Display name
    pub name: String,
    /// Canonical slug on the source
    pub slug: String,
    /// Device page, when the source provides one
    #[serde(default)]
    pub url: Option<String>,
}

/// Catalog search and enumeration endpoints.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Free-text search
    async fn search(&self, query: &str) -> Result<Vec<SourceHit>>;

    /// Full catalog listing, optionally narrowed to a brand
    async fn enumerate(&self, brand: Option<&str>) -> Result<Vec<SourceHit>>;
}

/// Accepts both a bare array and `{"results": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum HitsResponse {
    Bare(Vec<SourceHit>),
    Wrapped { results: Vec<SourceHit> },
}

impl HitsResponse {
    fn into_hits(self) -> Vec<SourceHit> {
        match self {
            Self::Bare(hits) | Self::Wrapped { results: hits } => hits,
        }
    }
}

/// [`CatalogSource`] over HTTP JSON endpoints.
pub struct HttpCatalogSource {
    client: Client,
    search_url: url::Url,
    enumeration_url: url::Url,
}

impl HttpCatalogSource {
    /// Create a client for the configured endpoints.
    ///
    /// # Errors
    /// Returns `SearchError::Config` if an endpoint is not a valid URL or
    /// the HTTP client cannot be built.
    pub fn new(source: &SourceConfig, search: &SearchConfig) -> Result<Self> {
        let parse = |raw: &str, field: &str| {
            url::Url::parse(raw).map_err(|e| SearchError::Config(format!("{field}: {e}")))
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(search.request_timeout_secs))
            .user_agent(concat!("specforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            search_url: parse(&source.search_url, "source.search_url")?,
            enumeration_url: parse(&source.enumeration_url, "source.enumeration_url")?,
        })
    }

    async fn fetch(&self, url: url::Url) -> Result<Vec<SourceHit>> {
        tracing::debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Status {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let body = response.text().await?;
        let parsed: HitsResponse =
            serde_json::from_str(&body).map_err(|e| SearchError::Parse(e.to_string()))?;
        Ok(parsed.into_hits())
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn search(&self, query: &str) -> Result<Vec<SourceHit>> {
        let mut url = self.search_url.clone();
        url.query_pairs_mut().append_pair("q", query);
        self.fetch(url).await
    }

    async fn enumerate(&self, brand: Option<&str>) -> Result<Vec<SourceHit>> {
        let mut url = self.enumeration_url.clone();
        if let Some(brand) = brand {
            url.query_pairs_mut().append_pair("brand", brand);
        }
        self.fetch(url).await
    }
}
