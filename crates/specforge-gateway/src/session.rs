//! Per-connection state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// State shared by every request on one connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    watched: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session that ends when `cancel` is tripped.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            watched: Arc::default(),
            cancel,
        }
    }

    /// Forward events for `job_id` to this connection.
    pub fn watch(&self, job_id: &str) {
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string());
    }

    /// Whether events for `job_id` are forwarded.
    #[must_use]
    pub fn is_watching(&self, job_id: &str) -> bool {
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }

    /// Tripped when the connection closes.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_is_shared_across_clones() {
        let session = Session::default();
        let other = session.clone();
        assert!(!other.is_watching("job-1"));

        session.watch("job-1");
        assert!(other.is_watching("job-1"));
        assert!(!other.is_watching("job-2"));
    }
}
