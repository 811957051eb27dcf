//! Derived entity persistence.
//!
//! One derived record per `(device_id, source)`. Derived rows are always
//! reproducible from raw entities, so they are overwritten freely.

use crate::error::Result;
use crate::scrape_jobs::parse_timestamp;
use serde::Serialize;
use serde_json::Value;
use specforge_core::Timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Pool, Row, Sqlite};

/// A normalized record computed from raw entities.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedEntity {
    /// Device the record describes
    pub device_id: String,
    /// Source the raw data came from
    pub source: String,
    /// Normalized payload
    pub data: Value,
    /// When it was last computed
    pub derived_at: Timestamp,
}

/// Insert or replace the derived record for a device and source.
pub async fn upsert<'e, E>(
    executor: E,
    device_id: &str,
    source: &str,
    data: &Value,
    now: Timestamp,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r"
        INSERT INTO derived_entities (device_id, source, data, derived_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(device_id, source) DO UPDATE SET
            data = excluded.data,
            derived_at = excluded.derived_at
        ",
    )
    .bind(device_id)
    .bind(source)
    .bind(serde_json::to_string(data)?)
    .bind(now.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Get the derived record for a device and source.
pub async fn get(
    pool: &Pool<Sqlite>,
    device_id: &str,
    source: &str,
) -> Result<Option<DerivedEntity>> {
    sqlx::query(
        "SELECT device_id, source, data, derived_at FROM derived_entities
         WHERE device_id = ? AND source = ?",
    )
    .bind(device_id)
    .bind(source)
    .fetch_optional(pool)
    .await?
    .as_ref()
    .map(parse_derived)
    .transpose()
}

/// Every derived record, ordered by key.
pub async fn list_all(pool: &Pool<Sqlite>) -> Result<Vec<DerivedEntity>> {
    let rows = sqlx::query(
        "SELECT device_id, source, data, derived_at FROM derived_entities
         ORDER BY device_id, source",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_derived).collect()
}

fn parse_derived(row: &SqliteRow) -> Result<DerivedEntity> {
    let data: String = row.try_get("data")?;
    Ok(DerivedEntity {
        device_id: row.try_get("device_id")?,
        source: row.try_get("source")?,
        data: serde_json::from_str(&data)?,
        derived_at: parse_timestamp(row, "derived_at")?,
    })
}
