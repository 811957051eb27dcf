//! Job events broadcast to protocol connections.

use serde::Serialize;
use specforge_core::JobStep;
use tokio::sync::broadcast;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observable happened to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobEvent {
    /// The scrape attempt entered a new stage
    Progress {
        /// Job id
        job_id: String,
        /// Stage name (`navigating`, `validating`, `extracting`, `done`)
        stage: String,
        /// Percent complete, monotonic within an attempt
        percent: u8,
        /// Human-readable detail
        message: String,
    },
    /// An attempt failed and another one is scheduled
    Retry {
        /// Job id
        job_id: String,
        /// The attempt that failed (1-based)
        attempt: u32,
        /// Attempt budget
        max_attempts: u32,
        /// Wait before the next attempt
        delay_ms: u64,
        /// Why the attempt failed
        reason: String,
    },
    /// The job moved to a new step
    Step {
        /// Job id
        job_id: String,
        /// New step
        step: JobStep,
    },
    /// The job finished and its payloads are cached
    Done {
        /// Job id
        job_id: String,
        /// Device the payloads were stored for
        device_id: String,
    },
    /// The job ended without data
    Error {
        /// Job id
        job_id: String,
        /// Terminal error message
        message: String,
    },
}

impl JobEvent {
    /// The job this event belongs to.
    #[must_use]
    pub fn job_id(&self) -> &str {
        match self {
            Self::Progress { job_id, .. }
            | Self::Retry { job_id, .. }
            | Self::Step { job_id, .. }
            | Self::Done { job_id, .. }
            | Self::Error { job_id, .. } => job_id,
        }
    }
}

/// Fan-out of job events to every subscriber.
///
/// Publishing never blocks; a subscriber that falls behind by more than the
/// channel capacity loses the oldest events and sees `Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!("Job {} event: {:?}", event.job_id(), event);
        let _ = self.sender.send(event);
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = JobEvent::Retry {
            job_id: "job-1".into(),
            attempt: 1,
            max_attempts: 3,
            delay_ms: 1000,
            reason: "connection reset".into(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "retry");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["maxAttempts"], 3);
        assert_eq!(json["delayMs"], 1000);

        let step = serde_json::to_value(JobEvent::Step {
            job_id: "job-1".into(),
            step: JobStep::SlugConflict,
        })
        .expect("serialize");
        assert_eq!(step["type"], "step");
        assert_eq!(step["step"], "slug_conflict");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(JobEvent::Done {
            job_id: "job-1".into(),
            device_id: "dev-1".into(),
        });

        let mut rx = bus.subscribe();
        bus.publish(JobEvent::Error {
            job_id: "job-2".into(),
            message: "boom".into(),
        });
        let event = rx.recv().await.expect("receive");
        assert_eq!(event.job_id(), "job-2");
    }
}
