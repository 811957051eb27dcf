//! Search & match pipeline.
//!
//! Resolves a free-text device name to a confirmed canonical target:
//!
//! 1. Query the catalog-search source, retrying transport and 5xx failures
//!    with a fixed delay up to `search.max_retries` attempts.
//! 2. Fall back to full enumeration filtered by name when the result set
//!    reaches `search.fallback_threshold`.
//! 3. Map hits to candidates de-duplicated by canonical id.
//! 4. Ask the configured [`MatchOracle`] to pick among several candidates.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod client;
pub mod error;
pub mod matcher;
pub mod oracle;
pub mod pipeline;
pub mod retry;

pub use client::{CatalogSource, HttpCatalogSource, SourceHit};
pub use error::{Result, SearchError};
pub use oracle::{build_oracle, HeuristicOracle, LlmOracle, MatchOracle};
pub use pipeline::{SearchOutcome, SearchPipeline, SearchReport};
pub use retry::{RetryNotice, RetryObserver, RetryPolicy};
