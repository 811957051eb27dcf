//! Worker pool and periodic reaper.
//!
//! Each worker loops `claim -> run one attempt -> complete`. An attempt
//! acts on the step the job is in when the item is claimed:
//!
//! - `searching` with a target request resolves straight to the target
//! - `searching` with a search request runs the search pipeline
//! - `scraping` runs the scrape executor and stores the page
//!
//! Search and scrape failures never escape the worker; they become job
//! updates through [`JobQueue::complete_item`].

use crate::error::Result;
use crate::events::JobEvent;
use crate::service::{AttemptOutcome, JobQueue, Resolution};
use async_trait::async_trait;
use specforge_cache::CacheStore;
use specforge_core::{FailureKind, JobStep, ScrapeRequest, ScrapeStage};
use specforge_db::{QueueItem, ScrapeJob};
use specforge_scraper::{ProgressReporter, ScrapeError, ScrapeExecutor};
use specforge_search::{RetryNotice, SearchError, SearchOutcome, SearchPipeline};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One worker: claims items and runs their attempts.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    search: Arc<SearchPipeline>,
    executor: Arc<ScrapeExecutor>,
    cache: CacheStore,
}

impl Worker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        search: Arc<SearchPipeline>,
        executor: Arc<ScrapeExecutor>,
        cache: CacheStore,
    ) -> Self {
        Self {
            id,
            queue,
            search,
            executor,
            cache,
        }
    }

    /// Claim and run items until `shutdown` is tripped.
    pub async fn run(self, shutdown: CancellationToken) {
        let idle = Duration::from_millis(self.queue.config().poll_interval_ms.max(10));
        tracing::info!("Worker {} started", self.id);

        while !shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::error!("Worker {} failed to process an item: {}", self.id, e),
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(idle) => {}
            }
        }

        tracing::info!("Worker {} stopped", self.id);
    }

    /// Claim one item and run it. Returns `false` when nothing was eligible.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(item) = self.queue.claim_next().await? else {
            return Ok(false);
        };
        self.process(&item).await?;
        Ok(true)
    }

    /// Run one claimed item to completion.
    pub async fn process(&self, item: &QueueItem) -> Result<()> {
        let attempt = self.queue.begin_attempt(&item.job_id).await;
        let cancel = attempt.token().clone();

        let Some(job) = self.queue.get_job(&item.job_id).await? else {
            self.queue
                .complete_item(item, AttemptOutcome::Cancelled)
                .await?;
            return Ok(());
        };
        tracing::debug!(
            "Worker {} running attempt {} of job {} (device {}) in {}",
            self.id,
            item.attempt,
            job.id,
            job.device_id,
            job.step
        );

        let outcome = match job.step {
            JobStep::Searching => self.search_stage(item, job, &cancel).await?,
            JobStep::Scraping => self.scrape_stage(item, &job, &cancel).await,
            step => {
                tracing::debug!("Job {} is {}; nothing to run", job.id, step);
                AttemptOutcome::Cancelled
            }
        };

        self.queue.complete_item(item, outcome).await?;
        drop(attempt);
        Ok(())
    }

    async fn search_stage(
        &self,
        item: &QueueItem,
        job: ScrapeJob,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome> {
        let (query, brand) = match job.request() {
            ScrapeRequest::Target { target_id } => {
                return self.resolve_and_scrape(item, &job, &target_id, cancel).await;
            }
            ScrapeRequest::Search { query, brand } => (query, brand),
        };

        let retries = AtomicU32::new(0);
        let events = self.queue.events().clone();
        let job_id = job.id.clone();
        let observer = |notice: &RetryNotice| {
            retries.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(
                "Job {} search attempt {}/{} failed, retrying in {:?}: {}",
                job_id,
                notice.attempt,
                notice.max_attempts,
                notice.delay,
                notice.reason
            );
            events.publish(JobEvent::Retry {
                job_id: job_id.clone(),
                attempt: notice.attempt,
                max_attempts: notice.max_attempts,
                delay_ms: u64::try_from(notice.delay.as_millis()).unwrap_or(u64::MAX),
                reason: notice.reason.clone(),
            });
        };

        let report = match self
            .search
            .run(&query, brand.as_deref(), &observer, cancel)
            .await
        {
            Ok(report) => report,
            Err(SearchError::Cancelled) => return Ok(AttemptOutcome::Cancelled),
            Err(e) => {
                let attempts = match &e {
                    SearchError::Exhausted { attempts, .. } => *attempts,
                    _ => retries.load(Ordering::SeqCst) + 1,
                };
                return Ok(AttemptOutcome::Fatal {
                    kind: e.failure_kind(),
                    error: e.to_string(),
                    attempts: Some(attempts),
                });
            }
        };

        match report.outcome {
            SearchOutcome::Resolved {
                candidate,
                via_oracle,
            } => {
                tracing::info!(
                    "Job {} matched '{}' to {}{}",
                    job.id,
                    query,
                    candidate.target_id,
                    if via_oracle { " (oracle pick)" } else { "" }
                );
                self.resolve_and_scrape(item, &job, &candidate.target_id, cancel)
                    .await
            }
            SearchOutcome::Ambiguous { candidates } => {
                tracing::info!(
                    "Job {} found {} candidates for '{}'; waiting for a pick",
                    job.id,
                    candidates.len(),
                    query
                );
                Ok(AttemptOutcome::NeedsSelection { candidates })
            }
            SearchOutcome::NoResults => Ok(AttemptOutcome::Fatal {
                kind: FailureKind::Parse,
                error: format!("no devices matched '{query}'"),
                attempts: Some(report.attempts),
            }),
        }
    }

    /// Move the job to `scraping` and, when that sticks, scrape within the
    /// same claim.
    async fn resolve_and_scrape(
        &self,
        item: &QueueItem,
        job: &ScrapeJob,
        target_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome> {
        match self.queue.resolve_target(job, target_id, false).await? {
            Resolution::Scraping(scraping) => Ok(self.scrape_stage(item, &scraping, cancel).await),
            Resolution::Conflict { .. } => Ok(AttemptOutcome::Settled),
            Resolution::Moved => Ok(AttemptOutcome::Cancelled),
        }
    }

    async fn scrape_stage(
        &self,
        item: &QueueItem,
        job: &ScrapeJob,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let Some(target_id) = job.target_id.as_deref() else {
            return AttemptOutcome::Fatal {
                kind: FailureKind::Configuration,
                error: "scraping job has no target".to_string(),
                attempts: None,
            };
        };
        let url = self.queue.source().device_url(target_id);
        let progress = JobProgress {
            queue: self.queue.clone(),
            job_id: job.id.clone(),
        };

        let page = match self.executor.execute(&url, &progress, cancel).await {
            Ok(page) => page,
            Err(ScrapeError::Cancelled) => {
                tracing::info!("Job {} attempt {} cancelled", job.id, item.attempt);
                return AttemptOutcome::Cancelled;
            }
            Err(e) => {
                return AttemptOutcome::Failed {
                    kind: e.failure_kind(),
                    error: e.to_string(),
                }
            }
        };

        match self
            .cache
            .store_device_page(&job.device_id, target_id, &url, &page)
            .await
        {
            Ok(stored) => {
                tracing::info!(
                    "Job {} stored {} for device {} ({} offers)",
                    job.id,
                    page.name,
                    job.device_id,
                    stored.quotes
                );
                AttemptOutcome::Scraped {
                    log: format!("stored {} with {} offers", page.name, stored.quotes),
                }
            }
            Err(e) => AttemptOutcome::Failed {
                kind: FailureKind::Transport,
                error: format!("failed to store scrape: {e}"),
            },
        }
    }
}

/// Forwards executor stages to the job row and the event bus.
struct JobProgress {
    queue: Arc<JobQueue>,
    job_id: String,
}

#[async_trait]
impl ProgressReporter for JobProgress {
    async fn report(&self, stage: ScrapeStage, message: &str) {
        if let Err(e) = self.queue.record_progress(&self.job_id, stage, message).await {
            tracing::warn!("Failed to record progress for job {}: {}", self.job_id, e);
        }
    }
}

/// Running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers`, each looping until `shutdown` is tripped.
    #[must_use]
    pub fn spawn(workers: Vec<Worker>, shutdown: &CancellationToken) -> Self {
        tracing::info!("Starting {} worker(s)", workers.len());
        let handles = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(shutdown.clone())))
            .collect();
        Self { handles }
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }
    }
}

/// Run [`JobQueue::reap_stale`] every `queue.reap_interval_secs`.
pub fn spawn_reaper(queue: Arc<JobQueue>, shutdown: CancellationToken) -> JoinHandle<()> {
    let interval = Duration::from_secs(queue.config().reap_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; startup recovery already ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match queue.reap_stale().await {
                Ok(report) if !report.is_empty() => {
                    tracing::info!(
                        "Reaper released {} claim(s), requeued {} job(s), interrupted {}",
                        report.released_claims,
                        report.requeued.len(),
                        report.interrupted.len()
                    );
                }
                Ok(_) => tracing::debug!("Reaper found nothing stale"),
                Err(e) => tracing::error!("Reaper run failed: {}", e),
            }
        }
        tracing::info!("Reaper stopped");
    })
}
