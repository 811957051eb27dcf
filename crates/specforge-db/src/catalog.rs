//! Catalog device store.
//!
//! The catalog product owns devices; the engine only needs to check
//! existence, create a device from a confirmed preview, and find which
//! device already owns a canonical slug.

use crate::error::{DatabaseError, Result};
use crate::scrape_jobs::parse_timestamp;
use async_trait::async_trait;
use serde::Serialize;
use specforge_core::Timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// A catalog device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Internal device id
    pub id: String,
    /// Canonical source slug the device was created from
    pub slug: String,
    /// Display name
    pub name: String,
    /// Brand
    pub brand: Option<String>,
    /// Creation time
    pub created_at: Timestamp,
}

/// Fields for a new catalog device.
#[derive(Debug, Clone)]
pub struct NewDevice {
    /// Internal device id
    pub id: String,
    /// Canonical source slug
    pub slug: String,
    /// Display name
    pub name: String,
    /// Brand
    pub brand: Option<String>,
}

/// Catalog operations the engine depends on.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Whether a device with this id exists
    async fn device_exists(&self, device_id: &str) -> Result<bool>;

    /// The device that owns a canonical slug, if any
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Device>>;

    /// Create a device; creating the same id and slug again is a no-op
    async fn create_device(&self, device: NewDevice) -> Result<Device>;
}

/// Catalog backed by the local `devices` table.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: Pool<Sqlite>,
}

impl SqliteCatalog {
    /// Wrap a pool.
    #[must_use]
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    async fn get(&self, device_id: &str) -> Result<Option<Device>> {
        sqlx::query("SELECT id, slug, name, brand, created_at FROM devices WHERE id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(parse_device)
            .transpose()
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn device_exists(&self, device_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE id = ?")
            .bind(device_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Device>> {
        sqlx::query("SELECT id, slug, name, brand, created_at FROM devices WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(parse_device)
            .transpose()
    }

    async fn create_device(&self, device: NewDevice) -> Result<Device> {
        if let Some(existing) = self.get(&device.id).await? {
            if existing.slug == device.slug {
                return Ok(existing);
            }
            return Err(DatabaseError::Conflict(format!(
                "device '{}' already exists with slug '{}'",
                device.id, existing.slug
            )));
        }

        let created_at = Timestamp::now();
        sqlx::query(
            "INSERT INTO devices (id, slug, name, brand, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&device.id)
        .bind(&device.slug)
        .bind(&device.name)
        .bind(device.brand.as_deref())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::info!("Created catalog device {} ({})", device.id, device.slug);

        Ok(Device {
            id: device.id,
            slug: device.slug,
            name: device.name,
            brand: device.brand,
            created_at,
        })
    }
}

fn parse_device(row: &SqliteRow) -> Result<Device> {
    Ok(Device {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        brand: row.try_get("brand")?,
        created_at: parse_timestamp(row, "created_at")?,
    })
}
