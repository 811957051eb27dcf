//! Specforge Queue - scrape job lifecycle, queue service and workers.
//!
//! A job is admitted in `searching` together with one queue item. Workers
//! claim items atomically, run one attempt (search, scrape, or both) and
//! report the outcome back to [`JobQueue`], which owns every write to the
//! job and queue tables. Retryable failures are rescheduled with a capped
//! exponential delay; the reaper releases dead claims and requeues stale
//! jobs once before interrupting them.
//!
//! # Example
//!
//! ```ignore
//! use specforge_queue::{JobQueue, ScrapeRequest};
//!
//! let queue = JobQueue::from_config(db, catalog, &config);
//! let job = queue
//!     .enqueue(None, "user-1", ScrapeRequest::Search { query: "pixel 8".into(), brand: None })
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod attempts;
pub mod error;
pub mod events;
pub mod service;
pub mod state;
pub mod worker;

pub use attempts::{AttemptGuard, AttemptRegistry};
pub use error::{QueueError, Result};
pub use events::{EventBus, JobEvent, DEFAULT_EVENT_CAPACITY};
pub use service::{AttemptOutcome, JobQueue, ReapReport, Resolution};
pub use specforge_core::ScrapeRequest;
pub use worker::{spawn_reaper, Worker, WorkerPool};
