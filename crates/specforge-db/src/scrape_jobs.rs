//! Scrape job persistence.
//!
//! Every step change is a compare-and-set on the current step, so two
//! writers racing on the same job cannot both win. The partial unique index
//! on `device_id` rejects a second active job for the same device.

use crate::error::{DatabaseError, Result};
use serde::Serialize;
use specforge_core::{Candidate, FailureKind, JobStep, ScrapeRequest, SlugConflict, Timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Pool, Row, Sqlite};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, device_id, user_id, step, query, brand, target_id, \
     autocomplete_options, slug_conflict, error, failure_kind, attempts, requeue_count, \
     progress_stage, progress_percent, last_log, created_at, updated_at, finished_at";

/// One caller-visible unit of work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeJob {
    /// Unique identifier
    pub id: String,
    /// Catalog device the job scrapes for
    pub device_id: String,
    /// Caller that requested it
    pub requesting_user_id: String,
    /// Current lifecycle step
    pub step: JobStep,
    /// Free-text query, for search requests
    pub query: Option<String>,
    /// Brand hint, for search requests
    pub brand: Option<String>,
    /// Resolved (or requested) canonical target
    pub target_id: Option<String>,
    /// Candidates awaiting a pick; only non-empty while `selecting`
    pub autocomplete_options: Vec<Candidate>,
    /// Set when the target belongs to another device
    pub slug_conflict: Option<SlugConflict>,
    /// Terminal error message
    pub error: Option<String>,
    /// Classification of the last failure
    pub failure_kind: Option<FailureKind>,
    /// Attempts consumed so far
    pub attempts: u32,
    /// Times the reaper has requeued this job
    pub requeue_count: u32,
    /// Last reported scrape stage
    pub progress_stage: Option<String>,
    /// Last reported percent-complete
    pub progress_percent: u8,
    /// Last human-readable log line
    pub last_log: Option<String>,
    /// When the job was admitted
    pub created_at: Timestamp,
    /// Last write to the job row
    pub updated_at: Timestamp,
    /// When the job reached a terminal step
    pub finished_at: Option<Timestamp>,
}

impl ScrapeJob {
    /// The request the job was admitted with.
    #[must_use]
    pub fn request(&self) -> ScrapeRequest {
        match &self.query {
            Some(query) => ScrapeRequest::Search {
                query: query.clone(),
                brand: self.brand.clone(),
            },
            None => ScrapeRequest::Target {
                target_id: self.target_id.clone().unwrap_or_default(),
            },
        }
    }
}

/// Field changes applied together with a step change.
///
/// `None` leaves the column untouched. Autocomplete options are stored only
/// when the new step is `selecting` and cleared otherwise.
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    /// Resolved canonical target
    pub target_id: Option<String>,
    /// Candidates for the caller to choose from
    pub autocomplete_options: Vec<Candidate>,
    /// Conflict details
    pub slug_conflict: Option<SlugConflict>,
    /// Error message
    pub error: Option<String>,
    /// Failure classification
    pub failure_kind: Option<FailureKind>,
    /// Attempt counter
    pub attempts: Option<u32>,
    /// Log line
    pub last_log: Option<String>,
}

/// Filter for [`list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs in this step
    pub step: Option<JobStep>,
    /// Only jobs for this device
    pub device_id: Option<String>,
    /// Maximum rows, newest first (default 100)
    pub limit: Option<u32>,
}

/// Insert a new job in `searching`.
///
/// A target request stores its slug in `target_id` right away.
///
/// # Errors
/// Returns a unique-violation `DatabaseError::Sqlx` when the device already
/// has an active job (see [`DatabaseError::is_unique_violation`]).
pub async fn insert_job<'e, E>(
    executor: E,
    device_id: &str,
    user_id: &str,
    request: &ScrapeRequest,
    now: Timestamp,
) -> Result<ScrapeJob>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (query, brand, target_id) = match request {
        ScrapeRequest::Search { query, brand } => (Some(query.as_str()), brand.as_deref(), None),
        ScrapeRequest::Target { target_id } => (None, None, Some(target_id.as_str())),
    };

    let sql = format!(
        "INSERT INTO scrape_jobs (id, device_id, user_id, step, query, brand, target_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING {JOB_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(device_id)
        .bind(user_id)
        .bind(JobStep::Searching.as_str())
        .bind(query)
        .bind(brand)
        .bind(target_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(executor)
        .await?;

    parse_job(&row)
}

/// Move a job from one of `from` to `to`, applying `update`.
///
/// Returns the updated job, or `None` when the job is not currently in any
/// of the `from` steps (someone else moved it first).
pub async fn transition<'e, E>(
    executor: E,
    job_id: &str,
    from: &[JobStep],
    to: JobStep,
    update: &StepUpdate,
    now: Timestamp,
) -> Result<Option<ScrapeJob>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if from.is_empty() {
        return Ok(None);
    }

    let options = if to == JobStep::Selecting {
        Some(serde_json::to_string(&update.autocomplete_options)?)
    } else {
        None
    };
    let conflict = update
        .slug_conflict
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let finished_at = to.is_terminal().then(|| now.to_rfc3339());

    let sql = format!(
        "UPDATE scrape_jobs SET
            step = ?,
            target_id = COALESCE(?, target_id),
            autocomplete_options = ?,
            slug_conflict = COALESCE(?, slug_conflict),
            error = COALESCE(?, error),
            failure_kind = COALESCE(?, failure_kind),
            attempts = COALESCE(?, attempts),
            last_log = COALESCE(?, last_log),
            updated_at = ?,
            finished_at = ?
         WHERE id = ? AND step IN ({})
         RETURNING {JOB_COLUMNS}",
        placeholders(from.len())
    );

    let mut query = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(update.target_id.as_deref())
        .bind(options)
        .bind(conflict)
        .bind(update.error.as_deref())
        .bind(update.failure_kind.map(|k| k.as_str()))
        .bind(update.attempts.map(i64::from))
        .bind(update.last_log.as_deref())
        .bind(now.to_rfc3339())
        .bind(finished_at)
        .bind(job_id);
    for step in from {
        query = query.bind(step.as_str());
    }

    query
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(parse_job)
        .transpose()
}

/// Record a failed attempt that will be retried; the step is unchanged.
///
/// Progress is reset so the next attempt reports from the start.
pub async fn record_retry<'e, E>(
    executor: E,
    job_id: &str,
    step: JobStep,
    attempts: u32,
    failure_kind: FailureKind,
    last_log: &str,
    now: Timestamp,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE scrape_jobs
         SET attempts = ?, failure_kind = ?, last_log = ?, progress_stage = NULL,
             progress_percent = 0, updated_at = ?
         WHERE id = ? AND step = ?",
    )
    .bind(i64::from(attempts))
    .bind(failure_kind.as_str())
    .bind(last_log)
    .bind(now.to_rfc3339())
    .bind(job_id)
    .bind(step.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Store the latest progress report for a job that is still scraping.
pub async fn update_progress(
    pool: &Pool<Sqlite>,
    job_id: &str,
    stage: &str,
    percent: u8,
    last_log: &str,
    now: Timestamp,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scrape_jobs
         SET progress_stage = ?, progress_percent = ?, last_log = ?, updated_at = ?
         WHERE id = ? AND step = ?",
    )
    .bind(stage)
    .bind(i64::from(percent))
    .bind(last_log)
    .bind(now.to_rfc3339())
    .bind(job_id)
    .bind(JobStep::Scraping.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Requeue bookkeeping for a stale job; succeeds only on its first requeue.
pub async fn mark_requeued<'e, E>(
    executor: E,
    job_id: &str,
    step: JobStep,
    last_log: &str,
    now: Timestamp,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE scrape_jobs
         SET requeue_count = requeue_count + 1, last_log = ?, progress_stage = NULL,
             progress_percent = 0, updated_at = ?
         WHERE id = ? AND step = ? AND requeue_count = 0",
    )
    .bind(last_log)
    .bind(now.to_rfc3339())
    .bind(job_id)
    .bind(step.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Get a job by ID.
pub async fn get_job(pool: &Pool<Sqlite>, job_id: &str) -> Result<Option<ScrapeJob>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM scrape_jobs WHERE id = ?");
    sqlx::query(&sql)
        .bind(job_id)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(parse_job)
        .transpose()
}

/// Get a job by ID, failing if it does not exist.
pub async fn require_job(pool: &Pool<Sqlite>, job_id: &str) -> Result<ScrapeJob> {
    get_job(pool, job_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFoundWithMessage(format!("Scrape job '{job_id}' not found")))
}

/// The device's active job, if any.
pub async fn active_job_for_device(
    pool: &Pool<Sqlite>,
    device_id: &str,
) -> Result<Option<ScrapeJob>> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM scrape_jobs
         WHERE device_id = ? AND step IN ('searching', 'selecting', 'scraping')"
    );
    sqlx::query(&sql)
        .bind(device_id)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(parse_job)
        .transpose()
}

/// List jobs, newest first.
pub async fn list_jobs(pool: &Pool<Sqlite>, filter: &JobFilter) -> Result<Vec<ScrapeJob>> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM scrape_jobs
         WHERE (?1 IS NULL OR step = ?1) AND (?2 IS NULL OR device_id = ?2)
         ORDER BY created_at DESC
         LIMIT ?3"
    );
    let rows = sqlx::query(&sql)
        .bind(filter.step.map(|s| s.as_str()))
        .bind(filter.device_id.as_deref())
        .bind(i64::from(filter.limit.unwrap_or(100)))
        .fetch_all(pool)
        .await?;

    rows.iter().map(parse_job).collect()
}

/// Active jobs in `steps` untouched since `cutoff` that have no open queue item.
///
/// An open item (pending or claimed) means the job is still owned by the
/// queue, so it is never reported here.
pub async fn stale_jobs(
    pool: &Pool<Sqlite>,
    steps: &[JobStep],
    cutoff: Timestamp,
) -> Result<Vec<ScrapeJob>> {
    if steps.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM scrape_jobs j
         WHERE j.updated_at < ?
           AND j.step IN ({})
           AND NOT EXISTS (
               SELECT 1 FROM queue_items q
               WHERE q.job_id = j.id AND q.completed_at IS NULL
           )
         ORDER BY j.updated_at",
        placeholders(steps.len())
    );
    let mut query = sqlx::query(&sql).bind(cutoff.to_rfc3339());
    for step in steps {
        query = query.bind(step.as_str());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(parse_job).collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn parse_job(row: &SqliteRow) -> Result<ScrapeJob> {
    let step: String = row.try_get("step")?;
    let options: Option<String> = row.try_get("autocomplete_options")?;
    let conflict: Option<String> = row.try_get("slug_conflict")?;
    let failure_kind: Option<String> = row.try_get("failure_kind")?;
    let progress_percent: i64 = row.try_get("progress_percent")?;

    Ok(ScrapeJob {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        requesting_user_id: row.try_get("user_id")?,
        step: step.parse()?,
        query: row.try_get("query")?,
        brand: row.try_get("brand")?,
        target_id: row.try_get("target_id")?,
        autocomplete_options: options
            .map(|s| serde_json::from_str(&s))
            .transpose()?
            .unwrap_or_default(),
        slug_conflict: conflict.map(|s| serde_json::from_str(&s)).transpose()?,
        error: row.try_get("error")?,
        failure_kind: failure_kind.map(|s| s.parse()).transpose()?,
        attempts: to_u32(row.try_get("attempts")?, "attempts")?,
        requeue_count: to_u32(row.try_get("requeue_count")?, "requeue_count")?,
        progress_stage: row.try_get("progress_stage")?,
        progress_percent: u8::try_from(progress_percent.clamp(0, 100)).unwrap_or(100),
        last_log: row.try_get("last_log")?,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
        finished_at: parse_optional_timestamp(row, "finished_at")?,
    })
}

pub(crate) fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{column} out of range: {value}")))
}

pub(crate) fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<Timestamp> {
    let value: String = row.try_get(column)?;
    Ok(Timestamp::from_rfc3339(&value)?)
}

pub(crate) fn parse_optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<Timestamp>> {
    let value: Option<String> = row.try_get(column)?;
    Ok(value.map(|v| Timestamp::from_rfc3339(&v)).transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    async fn setup_test_db() -> Database {
        let db = Database::in_memory().await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        db
    }

    fn search(query: &str) -> ScrapeRequest {
        ScrapeRequest::Search {
            query: query.to_string(),
            brand: None,
        }
    }

    #[tokio::test]
    async fn test_insert_job_starts_searching() {
        let db = setup_test_db().await;
        let job = insert_job(db.pool(), "dev-1", "user-1", &search("pixel 8"), Timestamp::now())
            .await
            .expect("insert job");

        assert_eq!(job.step, JobStep::Searching);
        assert_eq!(job.query.as_deref(), Some("pixel 8"));
        assert_eq!(job.attempts, 0);
        assert!(job.finished_at.is_none());
        assert_eq!(job.request(), search("pixel 8"));
    }

    #[tokio::test]
    async fn test_target_request_records_target() {
        let db = setup_test_db().await;
        let request = ScrapeRequest::Target {
            target_id: "google_pixel_8-12546".to_string(),
        };
        let job = insert_job(db.pool(), "dev-1", "user-1", &request, Timestamp::now())
            .await
            .expect("insert job");

        assert_eq!(job.target_id.as_deref(), Some("google_pixel_8-12546"));
        assert_eq!(job.request(), request);
    }

    #[tokio::test]
    async fn test_second_active_job_for_device_rejected() {
        let db = setup_test_db().await;
        insert_job(db.pool(), "dev-1", "user-1", &search("a"), Timestamp::now())
            .await
            .expect("first job");

        let err = insert_job(db.pool(), "dev-1", "user-2", &search("b"), Timestamp::now())
            .await
            .expect_err("second active job must be rejected");
        assert!(err.is_unique_violation());

        // a different device is unaffected
        insert_job(db.pool(), "dev-2", "user-1", &search("c"), Timestamp::now())
            .await
            .expect("other device");
    }

    #[tokio::test]
    async fn test_terminal_job_frees_device() {
        let db = setup_test_db().await;
        let job = insert_job(db.pool(), "dev-1", "user-1", &search("a"), Timestamp::now())
            .await
            .expect("insert job");

        let update = StepUpdate {
            error: Some("no results".to_string()),
            ..StepUpdate::default()
        };
        let job = transition(db.pool(), &job.id, &[JobStep::Searching], JobStep::Error, &update, Timestamp::now())
            .await
            .expect("transition")
            .expect("job was searching");
        assert_eq!(job.step, JobStep::Error);
        assert!(job.finished_at.is_some());

        insert_job(db.pool(), "dev-1", "user-1", &search("a"), Timestamp::now())
            .await
            .expect("device is free again");
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let db = setup_test_db().await;
        let job = insert_job(db.pool(), "dev-1", "user-1", &search("a"), Timestamp::now())
            .await
            .expect("insert job");

        let first = transition(
            db.pool(),
            &job.id,
            &[JobStep::Searching],
            JobStep::Scraping,
            &StepUpdate::default(),
            Timestamp::now(),
        )
        .await
        .expect("first transition");
        assert!(first.is_some());

        let second = transition(
            db.pool(),
            &job.id,
            &[JobStep::Searching],
            JobStep::Selecting,
            &StepUpdate::default(),
            Timestamp::now(),
        )
        .await
        .expect("second transition");
        assert!(second.is_none(), "stale expected step must not match");
    }

    #[tokio::test]
    async fn test_autocomplete_options_only_while_selecting() {
        let db = setup_test_db().await;
        let job = insert_job(db.pool(), "dev-1", "user-1", &search("galaxy"), Timestamp::now())
            .await
            .expect("insert job");

        let candidates = vec![
            Candidate {
                name: "Samsung Galaxy S24".to_string(),
                target_id: "samsung_galaxy_s24-12773".to_string(),
                source_url: "https://example.com/s24".to_string(),
            },
            Candidate {
                name: "Samsung Galaxy S24+".to_string(),
                target_id: "samsung_galaxy_s24+-12772".to_string(),
                source_url: "https://example.com/s24plus".to_string(),
            },
        ];
        let update = StepUpdate {
            autocomplete_options: candidates.clone(),
            ..StepUpdate::default()
        };
        let job = transition(db.pool(), &job.id, &[JobStep::Searching], JobStep::Selecting, &update, Timestamp::now())
            .await
            .expect("transition")
            .expect("job was searching");
        assert_eq!(job.autocomplete_options, candidates);

        let update = StepUpdate {
            target_id: Some("samsung_galaxy_s24-12773".to_string()),
            ..StepUpdate::default()
        };
        let job = transition(db.pool(), &job.id, &[JobStep::Selecting], JobStep::Scraping, &update, Timestamp::now())
            .await
            .expect("transition")
            .expect("job was selecting");
        assert!(job.autocomplete_options.is_empty());
        assert_eq!(job.target_id.as_deref(), Some("samsung_galaxy_s24-12773"));
    }

    #[tokio::test]
    async fn test_list_jobs_filters() {
        let db = setup_test_db().await;
        insert_job(db.pool(), "dev-1", "u", &search("a"), Timestamp::now())
            .await
            .expect("job 1");
        let job2 = insert_job(db.pool(), "dev-2", "u", &search("b"), Timestamp::now())
            .await
            .expect("job 2");
        transition(db.pool(), &job2.id, &[JobStep::Searching], JobStep::Scraping, &StepUpdate::default(), Timestamp::now())
            .await
            .expect("transition");

        let all = list_jobs(db.pool(), &JobFilter::default()).await.expect("list");
        assert_eq!(all.len(), 2);

        let scraping = list_jobs(
            db.pool(),
            &JobFilter {
                step: Some(JobStep::Scraping),
                ..JobFilter::default()
            },
        )
        .await
        .expect("list scraping");
        assert_eq!(scraping.len(), 1);
        assert_eq!(scraping[0].device_id, "dev-2");

        let dev1 = list_jobs(
            db.pool(),
            &JobFilter {
                device_id: Some("dev-1".to_string()),
                ..JobFilter::default()
            },
        )
        .await
        .expect("list dev-1");
        assert_eq!(dev1.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_only_while_scraping() {
        let db = setup_test_db().await;
        let job = insert_job(db.pool(), "dev-1", "u", &search("a"), Timestamp::now())
            .await
            .expect("insert job");

        let updated = update_progress(db.pool(), &job.id, "navigating", 10, "loading", Timestamp::now())
            .await
            .expect("update progress");
        assert!(!updated);

        transition(db.pool(), &job.id, &[JobStep::Searching], JobStep::Scraping, &StepUpdate::default(), Timestamp::now())
            .await
            .expect("transition");
        let updated = update_progress(db.pool(), &job.id, "extracting", 70, "parsing", Timestamp::now())
            .await
            .expect("update progress");
        assert!(updated);

        let job = require_job(db.pool(), &job.id).await.expect("get job");
        assert_eq!(job.progress_stage.as_deref(), Some("extracting"));
        assert_eq!(job.progress_percent, 70);
    }

    #[tokio::test]
    async fn test_mark_requeued_only_once() {
        let db = setup_test_db().await;
        let job = insert_job(db.pool(), "dev-1", "u", &search("a"), Timestamp::now())
            .await
            .expect("insert job");

        assert!(mark_requeued(db.pool(), &job.id, JobStep::Searching, "requeued", Timestamp::now())
            .await
            .expect("first requeue"));
        assert!(!mark_requeued(db.pool(), &job.id, JobStep::Searching, "requeued", Timestamp::now())
            .await
            .expect("second requeue"));
    }

    #[tokio::test]
    async fn test_require_job_missing() {
        let db = setup_test_db().await;
        let result = require_job(db.pool(), "missing").await;
        match result {
            Err(DatabaseError::NotFoundWithMessage(msg)) => {
                assert!(msg.contains("Scrape job 'missing' not found"));
            }
            _ => panic!("Expected NotFoundWithMessage error"),
        }
    }
}
