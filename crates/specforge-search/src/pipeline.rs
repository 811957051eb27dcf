//! Search, fallback enumeration and candidate resolution.

use crate::client::{CatalogSource, HttpCatalogSource, SourceHit};
use crate::error::Result;
use crate::matcher::{filter_by_name, search_text, to_candidates};
use crate::oracle::{build_oracle, MatchOracle};
use crate::retry::{retry_fixed, RetryObserver, RetryPolicy};
use serde::Serialize;
use specforge_core::{AppConfig, Candidate, SearchConfig, SourceConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a search resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// One candidate is confident enough to scrape
    Resolved {
        /// The chosen candidate
        candidate: Candidate,
        /// Whether an oracle picked it out of several
        via_oracle: bool,
    },
    /// Several candidates; the caller has to choose
    Ambiguous {
        /// Candidates in source order
        candidates: Vec<Candidate>,
    },
    /// Nothing matched
    NoResults,
}

/// Outcome plus bookkeeping for the job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    /// Resolution
    pub outcome: SearchOutcome,
    /// Attempts spent on the primary search
    pub attempts: u32,
    /// Whether the enumeration fallback replaced the primary hits
    pub used_fallback: bool,
}

/// The search and match pipeline.
pub struct SearchPipeline {
    source: Arc<dyn CatalogSource>,
    oracle: Option<Arc<dyn MatchOracle>>,
    search: SearchConfig,
    source_config: SourceConfig,
}

impl SearchPipeline {
    /// Assemble a pipeline from its parts.
    #[must_use]
    pub fn new(
        source: Arc<dyn CatalogSource>,
        oracle: Option<Arc<dyn MatchOracle>>,
        search: SearchConfig,
        source_config: SourceConfig,
    ) -> Self {
        Self {
            source,
            oracle,
            search,
            source_config,
        }
    }

    /// Build the HTTP source and configured oracle.
    ///
    /// # Errors
    /// Returns `SearchError::Config` for invalid endpoints or oracle settings.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let source = HttpCatalogSource::new(&config.source, &config.search)?;
        let oracle = build_oracle(&config.oracle)?;
        Ok(Self::new(
            Arc::new(source),
            oracle,
            config.search.clone(),
            config.source.clone(),
        ))
    }

    /// Source configuration used to build candidate URLs.
    #[must_use]
    pub fn source_config(&self) -> &SourceConfig {
        &self.source_config
    }

    /// Run one search.
    ///
    /// Network calls are retried with a fixed delay; each retry is reported
    /// to `observer` before the delay starts.
    ///
    /// # Errors
    /// Returns `SearchError::Exhausted` when retries run out, the
    /// non-retryable error that stopped the search, or
    /// `SearchError::Cancelled`.
    pub async fn run(
        &self,
        query: &str,
        brand: Option<&str>,
        observer: &dyn RetryObserver,
        cancel: &CancellationToken,
    ) -> Result<SearchReport> {
        let policy = RetryPolicy::from_config(&self.search);
        let text = search_text(query, brand);
        tracing::debug!("Searching {} for '{}'", self.source_config.name, text);

        let (mut hits, attempts) =
            retry_fixed(policy, observer, cancel, || self.source.search(&text)).await?;

        let mut used_fallback = false;
        if hits.len() >= self.search.fallback_threshold {
            tracing::info!(
                "Search for '{}' returned {} hits (threshold {}), falling back to enumeration",
                text,
                hits.len(),
                self.search.fallback_threshold
            );
            let (listing, _) =
                retry_fixed(policy, observer, cancel, || self.source.enumerate(brand)).await?;
            let filtered: Vec<SourceHit> = filter_by_name(listing, query);
            if filtered.is_empty() {
                tracing::debug!("Enumeration matched nothing, keeping primary hits");
            } else {
                hits = filtered;
                used_fallback = true;
            }
        }

        let candidates = to_candidates(hits, &self.source_config);
        let outcome = self.resolve(query, candidates).await;

        Ok(SearchReport {
            outcome,
            attempts,
            used_fallback,
        })
    }

    async fn resolve(&self, query: &str, mut candidates: Vec<Candidate>) -> SearchOutcome {
        match candidates.len() {
            0 => return SearchOutcome::NoResults,
            1 => {
                return SearchOutcome::Resolved {
                    candidate: candidates.remove(0),
                    via_oracle: false,
                }
            }
            _ => {}
        }

        if let Some(oracle) = &self.oracle {
            match oracle.pick(query, &candidates).await {
                Ok(Some(target_id)) => {
                    if let Some(candidate) =
                        candidates.iter().find(|c| c.target_id == target_id).cloned()
                    {
                        tracing::info!(
                            "Oracle '{}' resolved '{}' to {}",
                            oracle.name(),
                            query,
                            target_id
                        );
                        return SearchOutcome::Resolved {
                            candidate,
                            via_oracle: true,
                        };
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Oracle '{}' failed, leaving choice to caller: {}", oracle.name(), e);
                }
            }
        }

        SearchOutcome::Ambiguous { candidates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::retry::RetryNotice;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeSource {
        search: Vec<SourceHit>,
        listing: Vec<SourceHit>,
        enumerated: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl CatalogSource for FakeSource {
        async fn search(&self, _query: &str) -> Result<Vec<SourceHit>> {
            Ok(self.search.clone())
        }

        async fn enumerate(&self, brand: Option<&str>) -> Result<Vec<SourceHit>> {
            self.enumerated
                .lock()
                .unwrap()
                .push(brand.map(str::to_string));
            Ok(self.listing.clone())
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl MatchOracle for FailingOracle {
        async fn pick(&self, _query: &str, _candidates: &[Candidate]) -> Result<Option<String>> {
            Err(SearchError::Oracle("unreachable".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn hit(name: &str, slug: &str) -> SourceHit {
        SourceHit {
            name: name.to_string(),
            slug: slug.to_string(),
            url: None,
        }
    }

    fn pipeline(source: FakeSource, oracle: Option<Arc<dyn MatchOracle>>) -> SearchPipeline {
        SearchPipeline::new(
            Arc::new(source),
            oracle,
            SearchConfig::default(),
            SourceConfig::default(),
        )
    }

    fn source(search: Vec<SourceHit>, listing: Vec<SourceHit>) -> FakeSource {
        FakeSource {
            search,
            listing,
            enumerated: Mutex::new(Vec::new()),
        }
    }

    async fn run(pipeline: &SearchPipeline, query: &str, brand: Option<&str>) -> SearchReport {
        let observer = |_: &RetryNotice| {};
        pipeline
            .run(query, brand, &observer, &CancellationToken::new())
            .await
            .expect("search should succeed")
    }

    #[tokio::test]
    async fn test_single_hit_resolves() {
        let p = pipeline(source(vec![hit("Apple iPhone 15", "apple_iphone_15-12559")], vec![]), None);
        let report = run(&p, "iphone 15", None).await;
        assert_eq!(report.attempts, 1);
        match report.outcome {
            SearchOutcome::Resolved {
                candidate,
                via_oracle,
            } => {
                assert_eq!(candidate.target_id, "apple_iphone_15-12559");
                assert!(!via_oracle);
            }
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_hits() {
        let p = pipeline(source(vec![], vec![]), None);
        assert_eq!(run(&p, "nokia 3310", None).await.outcome, SearchOutcome::NoResults);
    }

    #[tokio::test]
    async fn test_ambiguous_without_oracle() {
        let p = pipeline(
            source(vec![hit("Google Pixel 8", "a"), hit("Google Pixel 8 Pro", "b")], vec![]),
            None,
        );
        match run(&p, "pixel", None).await.outcome {
            SearchOutcome::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oracle_resolves_ambiguity() {
        let p = pipeline(
            source(vec![hit("Google Pixel 8", "a"), hit("Google Pixel 8 Pro", "b")], vec![]),
            Some(Arc::new(crate::oracle::HeuristicOracle)),
        );
        assert!(matches!(
            run(&p, "pixel 8 pro", None).await.outcome,
            SearchOutcome::Resolved { via_oracle: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_oracle_error_keeps_candidates() {
        let p = pipeline(
            source(vec![hit("Google Pixel 8", "a"), hit("Google Pixel 8 Pro", "b")], vec![]),
            Some(Arc::new(FailingOracle)),
        );
        assert!(matches!(
            run(&p, "pixel 8", None).await.outcome,
            SearchOutcome::Ambiguous { .. }
        ));
    }

    #[tokio::test]
    async fn test_large_result_set_falls_back_to_enumeration() {
        let noisy: Vec<SourceHit> = (0..8)
            .map(|i| hit(&format!("Galaxy device {i}"), &format!("galaxy_{i}")))
            .collect();
        let listing = vec![
            hit("Samsung Galaxy S24", "samsung_galaxy_s24-12773"),
            hit("Samsung Galaxy A54", "samsung_galaxy_a54-12070"),
        ];
        let src = source(noisy, listing);
        let p = pipeline(src, None);

        let report = run(&p, "galaxy s24", Some("Samsung")).await;
        assert!(report.used_fallback);
        match report.outcome {
            SearchOutcome::Resolved { candidate, .. } => {
                assert_eq!(candidate.target_id, "samsung_galaxy_s24-12773");
            }
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fallback_with_no_matches_keeps_primary_hits() {
        let noisy: Vec<SourceHit> = (0..9)
            .map(|i| hit(&format!("Phone {i}"), &format!("phone_{i}")))
            .collect();
        let p = pipeline(source(noisy, vec![hit("Unrelated", "u")]), None);

        let report = run(&p, "phone", None).await;
        assert!(!report.used_fallback);
        match report.outcome {
            SearchOutcome::Ambiguous { candidates } => assert_eq!(candidates.len(), 9),
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }
}
