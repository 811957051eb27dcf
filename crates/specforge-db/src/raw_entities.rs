//! Raw entity persistence.
//!
//! A raw entity is a payload captured from a source, keyed by
//! `(device_id, source, data_kind)`. Writing a new capture supersedes the
//! current row instead of overwriting it; superseded rows stay for audit.
//! In-place edits go through [`replace_data`], which only normalization
//! passes call.

use crate::error::Result;
use crate::scrape_jobs::{parse_optional_timestamp, parse_timestamp};
use serde::Serialize;
use serde_json::Value;
use specforge_core::Timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Pool, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

/// One captured payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntity {
    /// Unique identifier
    pub id: String,
    /// Device the payload belongs to
    pub device_id: String,
    /// Source name
    pub source: String,
    /// Payload kind (`specs`, `prices`, ...)
    pub data_kind: String,
    /// Opaque structured payload
    pub data: Value,
    /// Capture time
    pub fetched_at: Timestamp,
    /// When a newer capture replaced this one
    pub superseded_at: Option<Timestamp>,
}

/// Store a capture, superseding the current row for the same key.
///
/// Runs two statements; pass a transaction to make them atomic.
pub async fn insert_raw(
    conn: &mut SqliteConnection,
    device_id: &str,
    source: &str,
    data_kind: &str,
    data: &Value,
    now: Timestamp,
) -> Result<RawEntity> {
    sqlx::query(
        "UPDATE raw_entities SET superseded_at = ?
         WHERE device_id = ? AND source = ? AND data_kind = ? AND superseded_at IS NULL",
    )
    .bind(now.to_rfc3339())
    .bind(device_id)
    .bind(source)
    .bind(data_kind)
    .execute(&mut *conn)
    .await?;

    let entity = RawEntity {
        id: Uuid::new_v4().to_string(),
        device_id: device_id.to_string(),
        source: source.to_string(),
        data_kind: data_kind.to_string(),
        data: data.clone(),
        fetched_at: now,
        superseded_at: None,
    };

    sqlx::query(
        "INSERT INTO raw_entities (id, device_id, source, data_kind, data, fetched_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&entity.id)
    .bind(&entity.device_id)
    .bind(&entity.source)
    .bind(&entity.data_kind)
    .bind(serde_json::to_string(data)?)
    .bind(now.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(entity)
}

/// The current capture for a key.
pub async fn get_current(
    pool: &Pool<Sqlite>,
    device_id: &str,
    source: &str,
    data_kind: &str,
) -> Result<Option<RawEntity>> {
    sqlx::query(
        "SELECT id, device_id, source, data_kind, data, fetched_at, superseded_at
         FROM raw_entities
         WHERE device_id = ? AND source = ? AND data_kind = ? AND superseded_at IS NULL",
    )
    .bind(device_id)
    .bind(source)
    .bind(data_kind)
    .fetch_optional(pool)
    .await?
    .as_ref()
    .map(parse_raw)
    .transpose()
}

/// Every current capture of a device, across sources and kinds.
pub async fn list_current_for_device(
    pool: &Pool<Sqlite>,
    device_id: &str,
) -> Result<Vec<RawEntity>> {
    let rows = sqlx::query(
        "SELECT id, device_id, source, data_kind, data, fetched_at, superseded_at
         FROM raw_entities
         WHERE device_id = ? AND superseded_at IS NULL
         ORDER BY source, data_kind",
    )
    .bind(device_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_raw).collect()
}

/// All rows, current and superseded, in stable order.
///
/// Normalization passes scan this set.
pub async fn list_all(pool: &Pool<Sqlite>) -> Result<Vec<RawEntity>> {
    let rows = sqlx::query(
        "SELECT id, device_id, source, data_kind, data, fetched_at, superseded_at
         FROM raw_entities
         ORDER BY device_id, source, data_kind, fetched_at, id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_raw).collect()
}

/// Capture history for a key, newest first.
pub async fn history(
    pool: &Pool<Sqlite>,
    device_id: &str,
    source: &str,
    data_kind: &str,
) -> Result<Vec<RawEntity>> {
    let rows = sqlx::query(
        "SELECT id, device_id, source, data_kind, data, fetched_at, superseded_at
         FROM raw_entities
         WHERE device_id = ? AND source = ? AND data_kind = ?
         ORDER BY fetched_at DESC, id",
    )
    .bind(device_id)
    .bind(source)
    .bind(data_kind)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_raw).collect()
}

/// Rewrite a row's payload in place. Reserved for normalization passes.
pub async fn replace_data<'e, E>(executor: E, id: &str, data: &Value) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE raw_entities SET data = ? WHERE id = ?")
        .bind(serde_json::to_string(data)?)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

fn parse_raw(row: &SqliteRow) -> Result<RawEntity> {
    let data: String = row.try_get("data")?;

    Ok(RawEntity {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        source: row.try_get("source")?,
        data_kind: row.try_get("data_kind")?,
        data: serde_json::from_str(&data)?,
        fetched_at: parse_timestamp(row, "fetched_at")?,
        superseded_at: parse_optional_timestamp(row, "superseded_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use serde_json::json;

    async fn setup_test_db() -> Database {
        let db = Database::in_memory().await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        db
    }

    #[tokio::test]
    async fn test_insert_supersedes_previous_capture() {
        let db = setup_test_db().await;
        let mut conn = db.pool().acquire().await.expect("acquire connection");

        let first = insert_raw(&mut conn, "dev-1", "gsmarena", "specs", &json!({"v": 1}), Timestamp::now())
            .await
            .expect("first capture");
        let second = insert_raw(
            &mut conn,
            "dev-1",
            "gsmarena",
            "specs",
            &json!({"v": 2}),
            Timestamp::now().plus_millis(1),
        )
        .await
        .expect("second capture");
        drop(conn);

        let current = get_current(db.pool(), "dev-1", "gsmarena", "specs")
            .await
            .expect("get current")
            .expect("current row");
        assert_eq!(current.id, second.id);
        assert_eq!(current.data, json!({"v": 2}));

        let history = history(db.pool(), "dev-1", "gsmarena", "specs")
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
        let old = history.iter().find(|e| e.id == first.id).expect("old row kept");
        assert!(old.superseded_at.is_some());
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let db = setup_test_db().await;
        let mut conn = db.pool().acquire().await.expect("acquire connection");
        insert_raw(&mut conn, "dev-1", "gsmarena", "specs", &json!({}), Timestamp::now())
            .await
            .expect("specs");
        insert_raw(&mut conn, "dev-1", "gsmarena", "prices", &json!([]), Timestamp::now())
            .await
            .expect("prices");
        drop(conn);

        let current = list_current_for_device(db.pool(), "dev-1")
            .await
            .expect("list current");
        assert_eq!(current.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_data() {
        let db = setup_test_db().await;
        let mut conn = db.pool().acquire().await.expect("acquire connection");
        let entity = insert_raw(&mut conn, "dev-1", "gsmarena", "specs", &json!({"colors": "a | b"}), Timestamp::now())
            .await
            .expect("insert");
        drop(conn);

        let replaced = replace_data(db.pool(), &entity.id, &json!({"colors": ["a", "b"]}))
            .await
            .expect("replace");
        assert!(replaced);

        let all = list_all(db.pool()).await.expect("list all");
        assert_eq!(all[0].data, json!({"colors": ["a", "b"]}));
    }
}
