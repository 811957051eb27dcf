//! Queue item persistence.
//!
//! A queue item is one scheduled attempt of a job. Items are never deleted:
//! finishing an item stamps `completed_at` and an [`ItemOutcome`].

use crate::error::Result;
use crate::scrape_jobs::{parse_optional_timestamp, parse_timestamp, to_u32};
use serde::Serialize;
use specforge_core::Timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Pool, Row, Sqlite};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const ITEM_COLUMNS: &str = "id, job_id, attempt, next_run_at, claimed_at, claim_token, \
     completed_at, outcome, last_error, created_at";

/// How a queue item was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// The attempt moved the job forward
    Succeeded,
    /// The attempt failed and a follow-up item was scheduled
    Retried,
    /// The attempt failed terminally
    Failed,
    /// The job was cancelled while the item was open
    Cancelled,
    /// The claim outlived the staleness threshold
    Abandoned,
}

impl ItemOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Retried => "retried",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "retried" => Ok(Self::Retried),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown queue item outcome '{other}'")),
        }
    }
}

/// One scheduled attempt belonging to a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Unique identifier
    pub id: String,
    /// Owning job
    pub job_id: String,
    /// 1-based attempt number this item runs
    pub attempt: u32,
    /// Earliest time a worker may claim it
    pub next_run_at: Timestamp,
    /// When a worker claimed it
    pub claimed_at: Option<Timestamp>,
    /// Ownership token handed to the claiming worker
    #[serde(skip)]
    pub claim_token: Option<String>,
    /// When it was closed
    pub completed_at: Option<Timestamp>,
    /// How it was closed
    pub outcome: Option<ItemOutcome>,
    /// Error recorded when it failed
    pub last_error: Option<String>,
    /// When it was scheduled
    pub created_at: Timestamp,
}

/// Schedule an attempt for a job.
pub async fn insert_item<'e, E>(
    executor: E,
    job_id: &str,
    attempt: u32,
    next_run_at: Timestamp,
    now: Timestamp,
) -> Result<QueueItem>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "INSERT INTO queue_items (id, job_id, attempt, next_run_at, created_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING {ITEM_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(job_id)
        .bind(i64::from(attempt))
        .bind(next_run_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(executor)
        .await?;

    parse_item(&row)
}

/// Atomically claim the earliest eligible item.
///
/// Selection and claim are one conditional `UPDATE`, so concurrent callers
/// can never receive the same item. The returned item carries the claim
/// token required by [`complete_item`].
pub async fn claim_next(pool: &Pool<Sqlite>, now: Timestamp) -> Result<Option<QueueItem>> {
    let token = Uuid::new_v4().to_string();
    let now_str = now.to_rfc3339();

    let sql = format!(
        "UPDATE queue_items
         SET claimed_at = ?, claim_token = ?
         WHERE id = (
             SELECT id FROM queue_items
             WHERE claimed_at IS NULL AND completed_at IS NULL AND next_run_at <= ?
             ORDER BY next_run_at, created_at
             LIMIT 1
         )
         AND claimed_at IS NULL AND completed_at IS NULL
         RETURNING {ITEM_COLUMNS}"
    );
    sqlx::query(&sql)
        .bind(&now_str)
        .bind(&token)
        .bind(&now_str)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(parse_item)
        .transpose()
}

/// Close a claimed item. Only the holder of `claim_token` can close it.
///
/// Returns `false` when the claim was lost (released by the reaper or
/// cancelled) before the worker finished.
pub async fn complete_item<'e, E>(
    executor: E,
    item_id: &str,
    claim_token: &str,
    outcome: ItemOutcome,
    last_error: Option<&str>,
    now: Timestamp,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE queue_items
         SET completed_at = ?, outcome = ?, last_error = ?
         WHERE id = ? AND claim_token = ? AND completed_at IS NULL",
    )
    .bind(now.to_rfc3339())
    .bind(outcome.as_str())
    .bind(last_error)
    .bind(item_id)
    .bind(claim_token)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Close every open item of a job, claimed or not.
pub async fn close_open_items<'e, E>(
    executor: E,
    job_id: &str,
    outcome: ItemOutcome,
    now: Timestamp,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE queue_items SET completed_at = ?, outcome = ?
         WHERE job_id = ? AND completed_at IS NULL",
    )
    .bind(now.to_rfc3339())
    .bind(outcome.as_str())
    .bind(job_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Abandon claims taken before `cutoff`; their workers are presumed dead.
///
/// Returns the job IDs whose items were abandoned.
pub async fn abandon_expired_claims(
    pool: &Pool<Sqlite>,
    cutoff: Timestamp,
    now: Timestamp,
) -> Result<Vec<String>> {
    let job_ids: Vec<String> = sqlx::query_scalar(
        "UPDATE queue_items
         SET completed_at = ?, outcome = ?, last_error = 'claim expired'
         WHERE claimed_at IS NOT NULL AND completed_at IS NULL AND claimed_at < ?
         RETURNING job_id",
    )
    .bind(now.to_rfc3339())
    .bind(ItemOutcome::Abandoned.as_str())
    .bind(cutoff.to_rfc3339())
    .fetch_all(pool)
    .await?;

    Ok(job_ids)
}

/// All items of a job, oldest first.
pub async fn list_for_job(pool: &Pool<Sqlite>, job_id: &str) -> Result<Vec<QueueItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM queue_items WHERE job_id = ? ORDER BY created_at, attempt"
    );
    let rows = sqlx::query(&sql).bind(job_id).fetch_all(pool).await?;
    rows.iter().map(parse_item).collect()
}

fn parse_item(row: &SqliteRow) -> Result<QueueItem> {
    let outcome: Option<String> = row.try_get("outcome")?;

    Ok(QueueItem {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        attempt: to_u32(row.try_get("attempt")?, "attempt")?,
        next_run_at: parse_timestamp(row, "next_run_at")?,
        claimed_at: parse_optional_timestamp(row, "claimed_at")?,
        claim_token: row.try_get("claim_token")?,
        completed_at: parse_optional_timestamp(row, "completed_at")?,
        outcome: outcome
            .map(|s| s.parse())
            .transpose()
            .map_err(crate::DatabaseError::Decode)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape_jobs::insert_job;
    use crate::Database;
    use specforge_core::ScrapeRequest;
    use std::collections::HashSet;

    async fn setup_test_db() -> Database {
        let db = Database::in_memory().await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        db
    }

    async fn create_job(db: &Database, device: &str) -> String {
        let request = ScrapeRequest::Target {
            target_id: format!("{device}-slug"),
        };
        insert_job(db.pool(), device, "user", &request, Timestamp::now())
            .await
            .expect("insert job")
            .id
    }

    #[tokio::test]
    async fn test_claim_respects_next_run_at() {
        let db = setup_test_db().await;
        let job_id = create_job(&db, "dev-1").await;
        let now = Timestamp::now();
        insert_item(db.pool(), &job_id, 1, now.plus_millis(60_000), now)
            .await
            .expect("insert item");

        let claimed = claim_next(db.pool(), now).await.expect("claim");
        assert!(claimed.is_none(), "item is not yet eligible");

        let claimed = claim_next(db.pool(), now.plus_millis(60_001))
            .await
            .expect("claim")
            .expect("item is eligible");
        assert_eq!(claimed.job_id, job_id);
        assert!(claimed.claimed_at.is_some());
        assert!(claimed.claim_token.is_some());
    }

    #[tokio::test]
    async fn test_claim_orders_by_next_run_at() {
        let db = setup_test_db().await;
        let later = create_job(&db, "dev-1").await;
        let earlier = create_job(&db, "dev-2").await;
        let now = Timestamp::now();
        insert_item(db.pool(), &later, 1, now.plus_millis(-1_000), now)
            .await
            .expect("insert later");
        insert_item(db.pool(), &earlier, 1, now.plus_millis(-5_000), now)
            .await
            .expect("insert earlier");

        let first = claim_next(db.pool(), now).await.expect("claim").expect("item");
        assert_eq!(first.job_id, earlier);
        let second = claim_next(db.pool(), now).await.expect("claim").expect("item");
        assert_eq!(second.job_id, later);
        assert!(claim_next(db.pool(), now).await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn test_complete_requires_claim_token() {
        let db = setup_test_db().await;
        let job_id = create_job(&db, "dev-1").await;
        let now = Timestamp::now();
        insert_item(db.pool(), &job_id, 1, now, now).await.expect("insert");
        let item = claim_next(db.pool(), now).await.expect("claim").expect("item");

        let wrong = complete_item(db.pool(), &item.id, "not-the-token", ItemOutcome::Succeeded, None, now)
            .await
            .expect("complete");
        assert!(!wrong);

        let token = item.claim_token.as_deref().expect("token");
        let right = complete_item(db.pool(), &item.id, token, ItemOutcome::Succeeded, None, now)
            .await
            .expect("complete");
        assert!(right);

        // archived, not deleted
        let items = list_for_job(db.pool(), &job_id).await.expect("list");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].outcome, Some(ItemOutcome::Succeeded));
        assert!(items[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_abandon_expired_claims() {
        let db = setup_test_db().await;
        let job_id = create_job(&db, "dev-1").await;
        let now = Timestamp::now();
        insert_item(db.pool(), &job_id, 1, now, now).await.expect("insert");
        let item = claim_next(db.pool(), now).await.expect("claim").expect("item");

        let none = abandon_expired_claims(db.pool(), now.plus_millis(-1), now)
            .await
            .expect("reap");
        assert!(none.is_empty(), "fresh claim is kept");

        let reaped = abandon_expired_claims(db.pool(), now.plus_millis(1), now)
            .await
            .expect("reap");
        assert_eq!(reaped, vec![job_id.clone()]);

        let token = item.claim_token.as_deref().expect("token");
        let late = complete_item(db.pool(), &item.id, token, ItemOutcome::Succeeded, None, now)
            .await
            .expect("complete");
        assert!(!late, "abandoned claim cannot be completed");
    }

    #[tokio::test]
    async fn test_close_open_items() {
        let db = setup_test_db().await;
        let job_id = create_job(&db, "dev-1").await;
        let now = Timestamp::now();
        insert_item(db.pool(), &job_id, 1, now, now).await.expect("insert");

        let closed = close_open_items(db.pool(), &job_id, ItemOutcome::Cancelled, now)
            .await
            .expect("close");
        assert_eq!(closed, 1);
        assert!(claim_next(db.pool(), now).await.expect("claim").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_share_an_item() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db = Database::new(dir.path().join("claims.db"), 8)
            .await
            .expect("create database");
        db.run_migrations().await.expect("run migrations");

        let now = Timestamp::now();
        for i in 0..20 {
            let job_id = create_job(&db, &format!("dev-{i}")).await;
            insert_item(db.pool(), &job_id, 1, now, now).await.expect("insert");
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = db.pool().clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(item) = claim_next(&pool, now).await.expect("claim") {
                    mine.push(item.id);
                }
                mine
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.await.expect("join") {
                total += 1;
                assert!(seen.insert(id), "item claimed twice");
            }
        }
        assert_eq!(total, 20);
    }
}
