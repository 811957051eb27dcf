//! Job queue service.
//!
//! The only writer of `scrape_jobs` and `queue_items`. Workers claim items,
//! run one attempt and report an [`AttemptOutcome`]; the service turns that
//! into a step change, a retry, or a terminal error. Every change is
//! committed before the events describing it are published.

use crate::attempts::{AttemptGuard, AttemptRegistry};
use crate::error::{QueueError, Result};
use crate::events::{EventBus, JobEvent};
use crate::state;
use serde::Serialize;
use specforge_core::{
    AppConfig, Candidate, DeviceId, FailureKind, JobStep, QueueConfig, ScrapeRequest, ScrapeStage,
    SlugConflict, SourceConfig, Timestamp,
};
use specforge_db::{
    queue_items, scrape_jobs, Catalog, Database, ItemOutcome, JobFilter, QueueItem, ScrapeJob,
    StepUpdate,
};
use std::sync::Arc;

/// Steps the reaper watches; `selecting` waits on a person and never stales.
const REAPED_STEPS: [JobStep; 2] = [JobStep::Searching, JobStep::Scraping];

/// How an attempt ended, as reported by the worker that ran it.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Search produced several candidates; wait for a pick
    NeedsSelection {
        /// Candidates offered to the caller
        candidates: Vec<Candidate>,
    },
    /// Payloads were stored; the job is done
    Scraped {
        /// Summary stored as the job's last log line
        log: String,
    },
    /// Failure that is retried while its kind allows and attempts remain
    Failed {
        /// Classification
        kind: FailureKind,
        /// Error message
        error: String,
    },
    /// Failure that ends the job regardless of the remaining budget
    Fatal {
        /// Classification
        kind: FailureKind,
        /// Error message
        error: String,
        /// Attempts to record; defaults to the item's attempt number
        attempts: Option<u32>,
    },
    /// The job was already moved during the attempt
    Settled,
    /// The attempt was cancelled; the job is left alone
    Cancelled,
}

/// Result of pointing a job at a canonical target.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The job is now `scraping`
    Scraping(ScrapeJob),
    /// The target belongs to another device; the job is now `slug_conflict`
    Conflict {
        /// Conflict details
        conflict: SlugConflict,
        /// The job as persisted
        job: ScrapeJob,
    },
    /// Someone else moved the job first
    Moved,
}

/// What one reaper run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapReport {
    /// Claims released because their worker stopped answering
    pub released_claims: usize,
    /// Jobs given one more queue item
    pub requeued: Vec<String>,
    /// Jobs that staled a second time and were interrupted
    pub interrupted: Vec<String>,
}

impl ReapReport {
    /// Whether the run changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.released_claims == 0 && self.requeued.is_empty() && self.interrupted.is_empty()
    }
}

/// Persistence and lifecycle owner for scrape jobs.
pub struct JobQueue {
    db: Database,
    catalog: Arc<dyn Catalog>,
    config: QueueConfig,
    source: SourceConfig,
    events: EventBus,
    attempts: AttemptRegistry,
}

impl JobQueue {
    /// Create a queue service.
    #[must_use]
    pub fn new(
        db: Database,
        catalog: Arc<dyn Catalog>,
        config: QueueConfig,
        source: SourceConfig,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            catalog,
            config,
            source,
            events,
            attempts: AttemptRegistry::new(),
        }
    }

    /// Create a queue service from the application configuration.
    #[must_use]
    pub fn from_config(db: Database, catalog: Arc<dyn Catalog>, config: &AppConfig) -> Self {
        Self::new(
            db,
            catalog,
            config.queue.clone(),
            config.source.clone(),
            EventBus::default(),
        )
    }

    /// Event bus carrying every job event.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Retry and staleness settings.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Source the jobs scrape from.
    #[must_use]
    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Catalog used for slug conflict checks.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Database the queue writes to.
    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Start an attempt for a job, waiting for its previous attempt to end.
    pub async fn begin_attempt(&self, job_id: &str) -> AttemptGuard {
        self.attempts.begin(job_id).await
    }

    /// Admit a new job in `searching` with one item eligible now.
    ///
    /// Without `device_id`, a target request uses the id derived from its
    /// slug and a search request the id derived from its normalized query.
    ///
    /// # Errors
    /// Returns `QueueError::DuplicateActiveJob` when the device already has
    /// a non-terminal job, or `QueueError::InvalidRequest` for blank input.
    pub async fn enqueue(
        &self,
        device_id: Option<&str>,
        user_id: &str,
        request: ScrapeRequest,
    ) -> Result<ScrapeJob> {
        self.enqueue_with(device_id, user_id, request, |_| {}).await
    }

    /// [`enqueue`](Self::enqueue), calling `on_created` once the job row
    /// exists and before it is committed or announced.
    ///
    /// A subscriber registered from `on_created` receives every event of
    /// the job, including the initial `step`.
    pub async fn enqueue_with(
        &self,
        device_id: Option<&str>,
        user_id: &str,
        request: ScrapeRequest,
        on_created: impl FnOnce(&ScrapeJob) + Send,
    ) -> Result<ScrapeJob> {
        let request = clean_request(request)?;
        let device_id = match device_id {
            Some(id) => DeviceId::new(id.trim())?,
            None => self.derive_device_id(&request),
        };
        let now = Timestamp::now();

        let mut tx = self.db.pool().begin().await?;
        let job = match scrape_jobs::insert_job(&mut *tx, device_id.as_str(), user_id, &request, now)
            .await
        {
            Ok(job) => job,
            Err(e) if e.is_unique_violation() => {
                drop(tx);
                let existing =
                    scrape_jobs::active_job_for_device(self.db.pool(), device_id.as_str()).await?;
                tracing::info!(
                    "Rejected job for device {}: job {} is still active",
                    device_id,
                    existing.as_ref().map_or("?", |j| j.id.as_str())
                );
                return Err(QueueError::DuplicateActiveJob {
                    device_id: device_id.to_string(),
                    existing_job_id: existing.map(|j| j.id),
                });
            }
            Err(e) => return Err(e.into()),
        };
        on_created(&job);
        queue_items::insert_item(&mut *tx, &job.id, 1, now, now).await?;
        tx.commit().await?;

        tracing::info!("Enqueued job {} for device {}", job.id, job.device_id);
        self.events.publish(JobEvent::Step {
            job_id: job.id.clone(),
            step: job.step,
        });
        Ok(job)
    }

    /// Claim the earliest eligible item.
    pub async fn claim_next(&self) -> Result<Option<QueueItem>> {
        self.claim_next_at(Timestamp::now()).await
    }

    /// Claim the earliest item eligible at `now`.
    pub async fn claim_next_at(&self, now: Timestamp) -> Result<Option<QueueItem>> {
        let item = queue_items::claim_next(self.db.pool(), now).await?;
        if let Some(item) = &item {
            tracing::debug!(
                "Claimed item {} (attempt {}) of job {}",
                item.id,
                item.attempt,
                item.job_id
            );
        }
        Ok(item)
    }

    /// Point a job at `target_id`, checking the catalog for a slug conflict.
    ///
    /// With `schedule`, a first scraping item is queued in the same
    /// transaction; workers resolving mid-attempt keep their current claim.
    pub async fn resolve_target(
        &self,
        job: &ScrapeJob,
        target_id: &str,
        schedule: bool,
    ) -> Result<Resolution> {
        let owner = self.catalog.find_by_slug(target_id).await?;
        let now = Timestamp::now();

        if let Some(device) = owner.filter(|d| d.id != job.device_id) {
            let conflict = SlugConflict {
                target_id: target_id.to_string(),
                existing_device_id: device.id,
                existing_device_name: device.name,
            };
            let message = format!(
                "target {} already belongs to device {} ({})",
                target_id, conflict.existing_device_id, conflict.existing_device_name
            );
            let update = StepUpdate {
                target_id: Some(target_id.to_string()),
                slug_conflict: Some(conflict.clone()),
                error: Some(message.clone()),
                failure_kind: Some(FailureKind::Conflict),
                last_log: Some(message.clone()),
                ..StepUpdate::default()
            };
            let moved = state::advance(
                self.db.pool(),
                job,
                JobStep::SlugConflict,
                &update,
                "record a slug conflict",
                now,
            )
            .await?;

            return Ok(match moved {
                Some(job) => {
                    tracing::warn!("Job {} (device {}): {}", job.id, job.device_id, message);
                    self.publish_step(&job);
                    self.events.publish(JobEvent::Error {
                        job_id: job.id.clone(),
                        message,
                    });
                    Resolution::Conflict { conflict, job }
                }
                None => Resolution::Moved,
            });
        }

        let update = StepUpdate {
            target_id: Some(target_id.to_string()),
            last_log: Some(format!("scraping {target_id}")),
            ..StepUpdate::default()
        };
        let mut tx = self.db.pool().begin().await?;
        let Some(moved) =
            state::advance(&mut *tx, job, JobStep::Scraping, &update, "start scraping", now).await?
        else {
            return Ok(Resolution::Moved);
        };
        if schedule {
            queue_items::insert_item(&mut *tx, &moved.id, 1, now, now).await?;
        }
        tx.commit().await?;

        tracing::info!(
            "Job {} (device {}) resolved to {}",
            moved.id,
            moved.device_id,
            target_id
        );
        self.publish_step(&moved);
        Ok(Resolution::Scraping(moved))
    }

    /// Confirm one of a `selecting` job's candidates.
    ///
    /// # Errors
    /// Returns `QueueError::SlugConflict` (with the job now persisted in
    /// `slug_conflict`) when the target belongs to another device,
    /// `QueueError::InvalidState` when the job is not `selecting`, and
    /// `QueueError::InvalidRequest` when the target was not offered.
    pub async fn confirm(&self, job_id: &str, target_id: &str) -> Result<ScrapeJob> {
        const ACTION: &str = "confirm a candidate";

        let job = self.require_job(job_id).await?;
        if job.step != JobStep::Selecting {
            return Err(QueueError::InvalidState {
                job_id: job.id,
                step: job.step,
                action: ACTION,
            });
        }
        let target_id = target_id.trim();
        if !job
            .autocomplete_options
            .iter()
            .any(|c| c.target_id == target_id)
        {
            return Err(QueueError::InvalidRequest(format!(
                "{target_id} is not one of job {job_id}'s candidates"
            )));
        }

        match self.resolve_target(&job, target_id, true).await? {
            Resolution::Scraping(job) => Ok(job),
            Resolution::Conflict { conflict, job } => Err(QueueError::SlugConflict {
                conflict,
                job: Box::new(job),
            }),
            Resolution::Moved => {
                let current = self.require_job(job_id).await?;
                Err(QueueError::InvalidState {
                    job_id: current.id,
                    step: current.step,
                    action: ACTION,
                })
            }
        }
    }

    /// Close a claimed item with the worker's outcome.
    ///
    /// Returns the job after the change, or `None` when the claim was lost
    /// (released by the reaper or cancelled) and the outcome was discarded.
    pub async fn complete_item(
        &self,
        item: &QueueItem,
        outcome: AttemptOutcome,
    ) -> Result<Option<ScrapeJob>> {
        let token = item.claim_token.as_deref().ok_or_else(|| {
            QueueError::InvalidRequest(format!("queue item {} was never claimed", item.id))
        })?;
        let job = self.require_job(&item.job_id).await?;
        let now = Timestamp::now();

        let retry = match &outcome {
            AttemptOutcome::Failed { kind, .. } => {
                kind.is_retryable()
                    && item.attempt < self.config.max_attempts
                    && !job.step.is_terminal()
            }
            _ => false,
        };
        let (item_outcome, last_error) = match &outcome {
            AttemptOutcome::NeedsSelection { .. }
            | AttemptOutcome::Scraped { .. }
            | AttemptOutcome::Settled => (ItemOutcome::Succeeded, None),
            AttemptOutcome::Failed { error, .. } if retry => {
                (ItemOutcome::Retried, Some(error.as_str()))
            }
            AttemptOutcome::Failed { error, .. } | AttemptOutcome::Fatal { error, .. } => {
                (ItemOutcome::Failed, Some(error.as_str()))
            }
            AttemptOutcome::Cancelled => (ItemOutcome::Cancelled, None),
        };

        let mut tx = self.db.pool().begin().await?;
        if !queue_items::complete_item(&mut *tx, &item.id, token, item_outcome, last_error, now)
            .await?
        {
            tracing::warn!(
                "Claim on item {} of job {} was lost; discarding {:?}",
                item.id,
                item.job_id,
                item_outcome
            );
            return Ok(None);
        }

        let mut events = Vec::new();
        let updated = match outcome {
            AttemptOutcome::NeedsSelection { candidates } => {
                let update = StepUpdate {
                    last_log: Some(format!("{} candidates need a pick", candidates.len())),
                    autocomplete_options: candidates,
                    ..StepUpdate::default()
                };
                state::advance(&mut *tx, &job, JobStep::Selecting, &update, "offer candidates", now)
                    .await?
            }
            AttemptOutcome::Scraped { log } => {
                let update = StepUpdate {
                    attempts: Some(item.attempt),
                    last_log: Some(log),
                    ..StepUpdate::default()
                };
                let done =
                    state::advance(&mut *tx, &job, JobStep::Done, &update, "finish", now).await?;
                if let Some(done) = &done {
                    events.push(JobEvent::Done {
                        job_id: done.id.clone(),
                        device_id: done.device_id.clone(),
                    });
                }
                done
            }
            AttemptOutcome::Failed { kind, error } if retry => {
                let delay = self.config.retry_delay(item.attempt);
                let log = format!(
                    "attempt {}/{} failed: {}",
                    item.attempt, self.config.max_attempts, error
                );
                scrape_jobs::record_retry(&mut *tx, &job.id, job.step, item.attempt, kind, &log, now)
                    .await?;
                let next_run_at = now.plus_millis(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
                queue_items::insert_item(&mut *tx, &job.id, item.attempt + 1, next_run_at, now)
                    .await?;
                tracing::warn!(
                    "Job {} (device {}) attempt {}/{} failed ({}), retrying in {:?}: {}",
                    job.id,
                    job.device_id,
                    item.attempt,
                    self.config.max_attempts,
                    kind,
                    delay,
                    error
                );
                events.push(JobEvent::Retry {
                    job_id: job.id.clone(),
                    attempt: item.attempt,
                    max_attempts: self.config.max_attempts,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason: error,
                });
                None
            }
            AttemptOutcome::Failed { kind, error } => {
                self.fail(&mut tx, &job, kind, error, item.attempt, now, &mut events)
                    .await?
            }
            AttemptOutcome::Fatal {
                kind,
                error,
                attempts,
            } => {
                let attempts = attempts.unwrap_or(item.attempt);
                self.fail(&mut tx, &job, kind, error, attempts, now, &mut events)
                    .await?
            }
            AttemptOutcome::Settled | AttemptOutcome::Cancelled => None,
        };
        tx.commit().await?;

        if let Some(updated) = &updated {
            self.publish_step(updated);
        }
        for event in events {
            self.events.publish(event);
        }

        match updated {
            Some(job) => Ok(Some(job)),
            None => Ok(scrape_jobs::get_job(self.db.pool(), &item.job_id).await?),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        job: &ScrapeJob,
        kind: FailureKind,
        error: String,
        attempts: u32,
        now: Timestamp,
        events: &mut Vec<JobEvent>,
    ) -> Result<Option<ScrapeJob>> {
        let update = StepUpdate {
            error: Some(error.clone()),
            failure_kind: Some(kind),
            attempts: Some(attempts),
            last_log: Some(error.clone()),
            ..StepUpdate::default()
        };
        let failed = state::advance(&mut **tx, job, JobStep::Error, &update, "fail", now).await?;
        if let Some(failed) = &failed {
            tracing::error!(
                "Job {} (device {}) failed after {} attempt(s) ({}): {}",
                failed.id,
                failed.device_id,
                attempts,
                kind,
                error
            );
            events.push(JobEvent::Error {
                job_id: failed.id.clone(),
                message: error,
            });
        }
        Ok(failed)
    }

    /// Store and broadcast the stage a running scrape attempt reached.
    pub async fn record_progress(
        &self,
        job_id: &str,
        stage: ScrapeStage,
        message: &str,
    ) -> Result<()> {
        let stored = scrape_jobs::update_progress(
            self.db.pool(),
            job_id,
            stage.as_str(),
            stage.percent(),
            message,
            Timestamp::now(),
        )
        .await?;

        if stored {
            self.events.publish(JobEvent::Progress {
                job_id: job_id.to_string(),
                stage: stage.as_str().to_string(),
                percent: stage.percent(),
                message: message.to_string(),
            });
        } else {
            tracing::debug!("Dropped {} progress for job {}: no longer scraping", stage, job_id);
        }
        Ok(())
    }

    /// Interrupt a non-terminal job and stop its running attempt.
    ///
    /// # Errors
    /// Returns `QueueError::InvalidState` when the job already ended.
    pub async fn cancel(&self, job_id: &str) -> Result<ScrapeJob> {
        let update = StepUpdate {
            error: Some("cancelled by caller".to_string()),
            last_log: Some("cancelled by caller".to_string()),
            ..StepUpdate::default()
        };

        // Each lost race means the job moved one step forward, so this ends.
        let cancelled = loop {
            let job = self.require_job(job_id).await?;
            if job.step.is_terminal() {
                return Err(QueueError::InvalidState {
                    job_id: job.id,
                    step: job.step,
                    action: "cancel",
                });
            }

            let now = Timestamp::now();
            let mut tx = self.db.pool().begin().await?;
            if let Some(cancelled) =
                state::advance(&mut *tx, &job, JobStep::Interrupted, &update, "cancel", now).await?
            {
                queue_items::close_open_items(&mut *tx, job_id, ItemOutcome::Cancelled, now).await?;
                tx.commit().await?;
                break cancelled;
            }
        };

        let running = self.attempts.cancel(job_id);
        tracing::info!(
            "Cancelled job {} (device {}){}",
            cancelled.id,
            cancelled.device_id,
            if running { ", stopping its running attempt" } else { "" }
        );
        self.publish_step(&cancelled);
        Ok(cancelled)
    }

    /// Release dead claims, then requeue or interrupt stale jobs.
    pub async fn reap_stale(&self) -> Result<ReapReport> {
        self.reap_stale_at(Timestamp::now()).await
    }

    /// [`Self::reap_stale`] as if the time were `now`.
    pub async fn reap_stale_at(&self, now: Timestamp) -> Result<ReapReport> {
        let stale_ms = i64::try_from(self.config.stale_after().as_millis()).unwrap_or(i64::MAX);
        self.reap(now, now.plus_millis(-stale_ms)).await
    }

    /// Startup reaping: no worker of a previous process is alive, so every
    /// claim is dead and every unowned active job is stale.
    pub async fn recover_after_restart(&self) -> Result<ReapReport> {
        let now = Timestamp::now();
        let report = self.reap(now, now.plus_millis(1)).await?;
        tracing::info!(
            "Startup recovery: released {} claim(s), requeued {} job(s), interrupted {}",
            report.released_claims,
            report.requeued.len(),
            report.interrupted.len()
        );
        Ok(report)
    }

    async fn reap(&self, now: Timestamp, cutoff: Timestamp) -> Result<ReapReport> {
        let mut report = ReapReport::default();

        let released = queue_items::abandon_expired_claims(self.db.pool(), cutoff, now).await?;
        for job_id in &released {
            tracing::warn!("Released expired claim of job {}", job_id);
            self.attempts.cancel(job_id);
        }
        report.released_claims = released.len();

        let stale = scrape_jobs::stale_jobs(self.db.pool(), &REAPED_STEPS, cutoff).await?;
        for job in stale {
            let mut tx = self.db.pool().begin().await?;
            let log = format!("requeued after stalling in {}", job.step);
            if scrape_jobs::mark_requeued(&mut *tx, &job.id, job.step, &log, now).await? {
                let attempt = (job.attempts + 1).min(self.config.max_attempts.max(1));
                queue_items::insert_item(&mut *tx, &job.id, attempt, now, now).await?;
                tx.commit().await?;
                tracing::warn!(
                    "Requeued stale job {} (device {}) in {} as attempt {}",
                    job.id,
                    job.device_id,
                    job.step,
                    attempt
                );
                report.requeued.push(job.id);
                continue;
            }

            let message = format!("stalled in {} again after being requeued", job.step);
            let update = StepUpdate {
                error: Some(message.clone()),
                failure_kind: Some(FailureKind::Transport),
                last_log: Some(message),
                ..StepUpdate::default()
            };
            if let Some(interrupted) =
                state::advance(&mut *tx, &job, JobStep::Interrupted, &update, "interrupt", now)
                    .await?
            {
                tx.commit().await?;
                tracing::error!(
                    "Interrupted stale job {} (device {})",
                    interrupted.id,
                    interrupted.device_id
                );
                self.publish_step(&interrupted);
                report.interrupted.push(interrupted.id);
            }
        }

        Ok(report)
    }

    /// Get a job by id.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<ScrapeJob>> {
        Ok(scrape_jobs::get_job(self.db.pool(), job_id).await?)
    }

    /// Get a job by id, failing with `QueueError::NotFound`.
    pub async fn require_job(&self, job_id: &str) -> Result<ScrapeJob> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))
    }

    /// List jobs, newest first.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ScrapeJob>> {
        Ok(scrape_jobs::list_jobs(self.db.pool(), filter).await?)
    }

    /// Every queue item of a job, oldest first.
    pub async fn queue_items(&self, job_id: &str) -> Result<Vec<QueueItem>> {
        self.require_job(job_id).await?;
        Ok(queue_items::list_for_job(self.db.pool(), job_id).await?)
    }

    fn derive_device_id(&self, request: &ScrapeRequest) -> DeviceId {
        match request {
            ScrapeRequest::Target { target_id } => DeviceId::from_slug(&self.source.name, target_id),
            ScrapeRequest::Search { query, brand } => {
                let text = specforge_search::matcher::search_text(query, brand.as_deref());
                let normalized = text
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect::<Vec<_>>()
                    .join(" ");
                DeviceId::from_slug(&self.source.name, &format!("query:{normalized}"))
            }
        }
    }

    fn publish_step(&self, job: &ScrapeJob) {
        self.events.publish(JobEvent::Step {
            job_id: job.id.clone(),
            step: job.step,
        });
    }
}

fn clean_request(request: ScrapeRequest) -> Result<ScrapeRequest> {
    match request {
        ScrapeRequest::Search { query, brand } => {
            let query = query.trim().to_string();
            if query.is_empty() {
                return Err(QueueError::InvalidRequest("query must not be empty".into()));
            }
            let brand = brand
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty());
            Ok(ScrapeRequest::Search { query, brand })
        }
        ScrapeRequest::Target { target_id } => {
            let target_id = target_id.trim().to_string();
            if target_id.is_empty() {
                return Err(QueueError::InvalidRequest("targetId must not be empty".into()));
            }
            Ok(ScrapeRequest::Target { target_id })
        }
    }
}
