//! Specforge Scraper - turns a confirmed target into a raw device payload.
//!
//! This crate drives one browser session per attempt, classifies the
//! fetched page and extracts structured fields from it.
//!
//! # Features
//!
//! - Pure content validation (bot walls, missing containers, wrong templates)
//! - Spec table, media and price-offer extraction with `scraper`
//! - Hard timeouts on navigation and extraction
//! - Progress reporting at coarse stages with increasing percent
//! - Cancellation that always releases the browser session
//!
//! # Example
//!
//! ```rust,ignore
//! use specforge_scraper::{NoopProgress, ScrapeExecutor};
//! use std::sync::Arc;
//!
//! let executor = ScrapeExecutor::new(Arc::new(browser_engine), &config.browser);
//! let page = executor
//!     .execute("https://www.gsmarena.com/apple_iphone_15-12559.php", &NoopProgress, &cancel)
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod executor;
pub mod extract;
pub mod validator;

// Re-export commonly used types
pub use error::{Result, ScrapeError};
pub use executor::{NoopProgress, ProgressReporter, ScrapeExecutor};
pub use extract::{extract_device, DevicePage, PriceOffer, ARRAY_FIELDS};
pub use validator::{validate, RejectionKind, Verdict};
