//! Specforge Cache - raw and derived device payloads.
//!
//! Raw payloads are stored per `(device_id, source, data_kind)` and never
//! edited except by a normalization pass. Derived records are recomputed
//! from the current raw set and can always be rebuilt.
//!
//! # Normalization
//!
//! Passes are forward-only and idempotent. A pass computes every change it
//! would make first; if there is at least one, the database is snapshotted
//! and the changes are applied in a single transaction. Each run is
//! recorded in the `normalization_runs` ledger.
//!
//! | Pass | Rewrites |
//! |---|---|
//! | `pipe-delimited-arrays` | `"a \| b"` strings in array fields |
//! | `double-encoded-json` | strings holding encoded arrays/objects |
//! | `price-redirect-type` | quotes with no redirect type |
//! | `rebuild-derived` | every derived record |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod derive;
pub mod error;
pub mod normalize;
pub mod runner;
pub mod store;

pub use derive::{classify_redirect, derive_device};
pub use error::{CacheError, Result};
pub use normalize::NormalizationPass;
pub use runner::{Normalizer, PassReport};
pub use store::{CacheStore, StoredScrape};

/// Raw payload kind holding the device page without offers.
pub const SPECS_KIND: &str = "specs";

/// Raw payload kind holding store offers.
pub const PRICES_KIND: &str = "prices";
