//! Job lifecycle edges.
//!
//! ```text
//! searching ──► selecting ──► scraping ──► done
//!    │  │            │            │
//!    │  └──► scraping└► slug_conflict
//!    ├──► error                   ├──► error
//!    ├──► slug_conflict           └──► interrupted
//!    └──► interrupted   (selecting ──► interrupted)
//! ```
//!
//! Every change goes through [`advance`], which refuses edges the lifecycle
//! does not have before issuing the conditional update.

use crate::error::{QueueError, Result};
use specforge_core::{JobStep, Timestamp};
use specforge_db::{scrape_jobs, ScrapeJob, StepUpdate};
use sqlx::{Executor, Sqlite};

/// Move `job` from the step it was read in to `to`.
///
/// Returns `None` when the row no longer is in `job.step` (another writer
/// moved it first); the caller decides whether that is an error.
///
/// # Errors
/// Returns `QueueError::InvalidState` when `job.step -> to` is not an edge.
pub async fn advance<'e, E>(
    executor: E,
    job: &ScrapeJob,
    to: JobStep,
    update: &StepUpdate,
    action: &'static str,
    now: Timestamp,
) -> Result<Option<ScrapeJob>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if !job.step.can_transition_to(to) {
        return Err(QueueError::InvalidState {
            job_id: job.id.clone(),
            step: job.step,
            action,
        });
    }

    let moved = scrape_jobs::transition(executor, &job.id, &[job.step], to, update, now).await?;
    match &moved {
        Some(updated) => tracing::debug!(
            "Job {} (device {}) {} -> {}",
            updated.id,
            updated.device_id,
            job.step,
            to
        ),
        None => tracing::debug!("Job {} left {} before it could move to {}", job.id, job.step, to),
    }
    Ok(moved)
}
