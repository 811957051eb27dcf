//! In-process registry of running attempts.
//!
//! Each job has at most one attempt running in this process. A new attempt
//! for the same job waits until the previous one has returned, which is
//! after its browser session was closed. Cancelling a job trips the token
//! of its running attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Slot {
    gate: Arc<tokio::sync::Mutex<()>>,
    cancel: Option<CancellationToken>,
}

/// Tracks the running attempt of every job.
#[derive(Debug, Clone, Default)]
pub struct AttemptRegistry {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl AttemptRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an attempt for `job_id`, waiting for a previous one to finish.
    pub async fn begin(&self, job_id: &str) -> AttemptGuard {
        let gate = {
            let mut slots = self.lock();
            let slot = slots.entry(job_id.to_string()).or_insert_with(|| Slot {
                gate: Arc::new(tokio::sync::Mutex::new(())),
                cancel: None,
            });
            slot.gate.clone()
        };

        let held = gate.lock_owned().await;
        let cancel = CancellationToken::new();
        if let Some(slot) = self.lock().get_mut(job_id) {
            slot.cancel = Some(cancel.clone());
        }

        AttemptGuard {
            registry: self.clone(),
            job_id: job_id.to_string(),
            cancel,
            held: Some(held),
        }
    }

    /// Trip the running attempt of `job_id`. Returns whether one was running.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().get(job_id).and_then(|slot| slot.cancel.as_ref()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether an attempt for `job_id` is running.
    #[must_use]
    pub fn is_running(&self, job_id: &str) -> bool {
        self.lock()
            .get(job_id)
            .is_some_and(|slot| slot.cancel.is_some())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running attempt. Dropping it lets the next attempt of the job start.
#[derive(Debug)]
pub struct AttemptGuard {
    registry: AttemptRegistry,
    job_id: String,
    cancel: CancellationToken,
    held: Option<OwnedMutexGuard<()>>,
}

impl AttemptGuard {
    /// Token tripped when the job is cancelled.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        let mut slots = self.registry.lock();
        let waiting = slots.get(&self.job_id).is_some_and(|slot| {
            // One reference in the map, one behind our held guard.
            Arc::strong_count(&slot.gate) > 2
        });
        if waiting {
            if let Some(slot) = slots.get_mut(&self.job_id) {
                slot.cancel = None;
            }
        } else {
            slots.remove(&self.job_id);
        }
        self.held.take();
    }
}
