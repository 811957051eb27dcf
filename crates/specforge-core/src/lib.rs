//! Specforge Core - Foundation crate for the specforge scrape engine.
//!
//! This crate provides shared types, error handling and configuration
//! management that every other specforge crate depends on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths and env overrides
//! - [`request`] - Scrape requests, search candidates and slug conflicts
//! - [`types`] - Shared newtypes and enums (`DeviceId`, `JobStep`, `ScrapeStage`, `Timestamp`)
//!
//! # Example
//!
//! ```rust
//! use specforge_core::{AppConfig, DeviceId, JobStep};
//!
//! let config = AppConfig::default();
//! assert_eq!(config.search.max_retries, 3);
//!
//! let id = DeviceId::from_slug("gsmarena", "apple_iphone_15-12559");
//! assert_eq!(id.as_str().len(), 16);
//! assert!(!JobStep::Searching.is_terminal());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod request;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, BrowserMode, DatabaseConfig, GatewayConfig, OracleConfig,
    OracleKind, QueueConfig, SearchConfig, SecretString, SourceConfig, WorkerConfig,
};
pub use error::{ConfigError, ConfigResult, Result, SpecforgeError};
pub use request::{Candidate, ScrapeRequest, SlugConflict};
pub use types::{DeviceId, FailureKind, JobStep, ScrapeStage, Timestamp};
