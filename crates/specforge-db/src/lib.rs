//! Specforge Database Layer
//!
//! Provides `SQLite` persistence for scrape jobs, queue items, cached raw and
//! derived entities, price quotes, catalog devices and the normalization
//! ledger. Uses `SQLx` with embedded migrations.
//!
//! # Example
//!
//! ```ignore
//! use specforge_db::Database;
//!
//! let db = Database::new("specforge.db", 5).await?;
//! db.run_migrations().await?;
//! ```
//!
//! # Design Principles
//!
//! - Job and queue rows are only mutated through conditional updates
//! - Timestamps are stored as fixed-width RFC3339 text so they sort as strings
//! - Raw payloads are superseded, never overwritten, outside normalization

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod catalog;
pub mod connection;
pub mod derived_entities;
pub mod error;
pub mod migrations;
pub mod normalization_runs;
pub mod price_quotes;
/// Queue item scheduling and atomic claims.
pub mod queue_items;
pub mod raw_entities;
pub mod scrape_jobs;

// Re-export commonly used types
pub use catalog::{Catalog, Device, NewDevice, SqliteCatalog};
pub use error::{DatabaseError, Result};
pub use queue_items::{ItemOutcome, QueueItem};
pub use scrape_jobs::{JobFilter, ScrapeJob, StepUpdate};

use sqlx::{Pool, Sqlite};
use std::path::Path;

/// High-level database handle with migrations.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// # Arguments
    /// * `path` - Path to the database file (or `:memory:` for in-memory)
    /// * `max_connections` - Pool size for on-disk databases
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let pool = connection::connect(path, max_connections).await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::new(":memory:", 1).await
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Write a consistent copy of the whole database to `dest`.
    ///
    /// # Errors
    /// Returns `DatabaseError::Snapshot` if `dest` already exists or
    /// `VACUUM INTO` fails.
    pub async fn snapshot_into(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(DatabaseError::Snapshot(format!(
                "{} already exists",
                dest.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let dest_str = dest.to_str().ok_or_else(|| {
            DatabaseError::Snapshot("snapshot path is not valid UTF-8".to_string())
        })?;

        sqlx::query("VACUUM INTO ?")
            .bind(dest_str)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Snapshot(e.to_string()))?;

        tracing::info!("Database snapshot written to {}", dest.display());
        Ok(())
    }

    /// Close the pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
