//! Fixed-delay retry loop for search requests.

use crate::error::{Result, SearchError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget and delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before each retry
    pub delay: Duration,
}

impl RetryPolicy {
    /// Build from the search section of the configuration.
    #[must_use]
    pub fn from_config(config: &specforge_core::SearchConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            delay: config.retry_delay(),
        }
    }
}

/// Reported once for every failed attempt that will be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Wait before the next attempt
    pub delay: Duration,
    /// Why the attempt failed
    pub reason: String,
}

/// Receives retry notices as they happen.
pub trait RetryObserver: Send + Sync {
    /// Called before the delay preceding a retry
    fn on_retry(&self, notice: &RetryNotice);
}

impl<F> RetryObserver for F
where
    F: Fn(&RetryNotice) + Send + Sync,
{
    fn on_retry(&self, notice: &RetryNotice) {
        self(notice);
    }
}

/// Run `op` until it succeeds, fails non-retryably, or the budget is spent.
///
/// Returns the value together with the number of attempts it took.
pub async fn retry_fixed<F, Fut, T>(
    policy: RetryPolicy,
    observer: &dyn RetryObserver,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<(T, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(SearchError::Cancelled),
            outcome = op() => outcome,
        };

        match outcome {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt >= policy.max_attempts {
                    tracing::error!(
                        "Search failed after {} attempts (max: {}): {}",
                        attempt,
                        policy.max_attempts,
                        e
                    );
                    return Err(SearchError::Exhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }

                tracing::warn!(
                    "Search failed on attempt {}/{}. Retrying in {:?}: {}",
                    attempt,
                    policy.max_attempts,
                    policy.delay,
                    e
                );
                observer.on_retry(&RetryNotice {
                    attempt,
                    max_attempts: policy.max_attempts,
                    delay: policy.delay,
                    reason: e.to_string(),
                });

                tokio::select! {
                    () = cancel.cancelled() => return Err(SearchError::Cancelled),
                    () = tokio::time::sleep(policy.delay) => {}
                }
            }
        }
    }

    Err(SearchError::Exhausted {
        attempts: 0,
        last_error: "no attempts allowed".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_two_notices() {
        let calls = Arc::new(AtomicU32::new(0));
        let notices = Mutex::new(Vec::new());
        let observer = |n: &RetryNotice| notices.lock().unwrap().push(n.clone());

        let result = retry_fixed(policy(), &observer, &CancellationToken::new(), || {
            let calls = calls.clone();
            async move {
                let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if current < 3 {
                    Err(SearchError::Transport("connection reset".into()))
                } else {
                    Ok("hit")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), ("hit", 3));
        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].attempt, 1);
        assert_eq!(notices[1].attempt, 2);
        assert_eq!(notices[1].max_attempts, 3);
        assert_eq!(notices[0].delay, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let observer = |_: &RetryNotice| {};

        let result: Result<((), u32)> =
            retry_fixed(policy(), &observer, &CancellationToken::new(), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SearchError::Status {
                        status: 502,
                        message: "bad gateway".into(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(SearchError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let observer = |_: &RetryNotice| {};

        let result: Result<((), u32)> =
            retry_fixed(policy(), &observer, &CancellationToken::new(), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SearchError::Parse("expected array".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(SearchError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay() {
        let cancel = CancellationToken::new();
        let observer = {
            let cancel = cancel.clone();
            move |_: &RetryNotice| cancel.cancel()
        };

        let result: Result<((), u32)> = retry_fixed(policy(), &observer, &cancel, || async {
            Err(SearchError::Transport("refused".into()))
        })
        .await;

        assert!(matches!(result, Err(SearchError::Cancelled)));
    }
}
