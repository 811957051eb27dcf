//! Ledger of normalization pass executions.

use crate::error::Result;
use crate::scrape_jobs::{parse_optional_timestamp, parse_timestamp, to_u32};
use serde::Serialize;
use specforge_core::Timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Pool, Row, Sqlite};
use uuid::Uuid;

/// One recorded pass execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationRun {
    /// Unique identifier
    pub id: String,
    /// Pass name
    pub pass: String,
    /// Start time
    pub started_at: Timestamp,
    /// End time; `None` if the pass died midway
    pub finished_at: Option<Timestamp>,
    /// Rows examined
    pub rows_scanned: u32,
    /// Rows rewritten
    pub rows_changed: u32,
    /// Snapshot taken before the first write, if any
    pub snapshot_path: Option<String>,
}

/// Table a normalization change was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedTable {
    /// `raw_entities`, keyed by row id
    RawEntities,
    /// `price_quotes`, keyed by row id
    PriceQuotes,
    /// `derived_entities`, keyed by `device_id:source`
    DerivedEntities,
}

impl ChangedTable {
    /// Table name as stored in the ledger.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawEntities => "raw_entities",
            Self::PriceQuotes => "price_quotes",
            Self::DerivedEntities => "derived_entities",
        }
    }
}

/// One row rewritten by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationChange {
    /// Run that rewrote the row
    pub run_id: String,
    /// Table name
    pub table_name: String,
    /// Row id, or `device_id:source` for derived entities
    pub row_key: String,
    /// When the rewrite was applied
    pub changed_at: Timestamp,
}

/// Open a ledger entry for a pass.
pub async fn start_run(pool: &Pool<Sqlite>, pass: &str, now: Timestamp) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO normalization_runs (id, pass, started_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(pass)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(id)
}

/// Close a ledger entry with its counters.
pub async fn finish_run(
    pool: &Pool<Sqlite>,
    run_id: &str,
    rows_scanned: u32,
    rows_changed: u32,
    snapshot_path: Option<&str>,
    now: Timestamp,
) -> Result<()> {
    sqlx::query(
        "UPDATE normalization_runs
         SET finished_at = ?, rows_scanned = ?, rows_changed = ?, snapshot_path = ?
         WHERE id = ?",
    )
    .bind(now.to_rfc3339())
    .bind(i64::from(rows_scanned))
    .bind(i64::from(rows_changed))
    .bind(snapshot_path)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Ledger entries, newest first, optionally for one pass.
pub async fn list_runs(pool: &Pool<Sqlite>, pass: Option<&str>) -> Result<Vec<NormalizationRun>> {
    let rows = sqlx::query(
        "SELECT id, pass, started_at, finished_at, rows_scanned, rows_changed, snapshot_path
         FROM normalization_runs
         WHERE (?1 IS NULL OR pass = ?1)
         ORDER BY started_at DESC",
    )
    .bind(pass)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_run).collect()
}

/// Record that `run_id` rewrote one row. Written in the rewrite's transaction.
pub async fn record_change<'e, E>(
    executor: E,
    run_id: &str,
    table: ChangedTable,
    row_key: &str,
    now: Timestamp,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT OR IGNORE INTO normalization_changes (run_id, table_name, row_key, changed_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(table.as_str())
    .bind(row_key)
    .bind(now.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

/// Rows rewritten by one run.
pub async fn list_changes(pool: &Pool<Sqlite>, run_id: &str) -> Result<Vec<NormalizationChange>> {
    let rows = sqlx::query(
        "SELECT run_id, table_name, row_key, changed_at
         FROM normalization_changes
         WHERE run_id = ?
         ORDER BY table_name, row_key",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_change).collect()
}

fn parse_change(row: &SqliteRow) -> Result<NormalizationChange> {
    Ok(NormalizationChange {
        run_id: row.try_get("run_id")?,
        table_name: row.try_get("table_name")?,
        row_key: row.try_get("row_key")?,
        changed_at: parse_timestamp(row, "changed_at")?,
    })
}

fn parse_run(row: &SqliteRow) -> Result<NormalizationRun> {
    Ok(NormalizationRun {
        id: row.try_get("id")?,
        pass: row.try_get("pass")?,
        started_at: parse_timestamp(row, "started_at")?,
        finished_at: parse_optional_timestamp(row, "finished_at")?,
        rows_scanned: to_u32(row.try_get("rows_scanned")?, "rows_scanned")?,
        rows_changed: to_u32(row.try_get("rows_changed")?, "rows_changed")?,
        snapshot_path: row.try_get("snapshot_path")?,
    })
}
