//! Scrape executor.
//!
//! One call is one attempt: open a session, navigate, validate, extract.
//! The session is closed on every path before the result is returned.

use crate::error::{Result, ScrapeError};
use crate::extract::{extract_device, DevicePage};
use crate::validator::{validate, Verdict};
use async_trait::async_trait;
use specforge_browser::{PageSession, SessionProvider};
use specforge_core::{BrowserConfig, ScrapeStage};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Receives stage changes of a running attempt.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Called on entering `stage`
    async fn report(&self, stage: ScrapeStage, message: &str);
}

/// Reporter that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressReporter for NoopProgress {
    async fn report(&self, _stage: ScrapeStage, _message: &str) {}
}

/// Drives one scrape attempt through a browser session.
pub struct ScrapeExecutor {
    sessions: Arc<dyn SessionProvider>,
    navigation_timeout: Duration,
    extraction_timeout: Duration,
    close_timeout: Duration,
}

impl ScrapeExecutor {
    /// Create an executor using the browser timeouts from configuration.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionProvider>, config: &BrowserConfig) -> Self {
        Self::with_timeouts(
            sessions,
            config.navigation_timeout(),
            config.extraction_timeout(),
        )
        .with_close_timeout(config.close_timeout())
    }

    /// Create an executor with explicit timeouts.
    #[must_use]
    pub fn with_timeouts(
        sessions: Arc<dyn SessionProvider>,
        navigation_timeout: Duration,
        extraction_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            navigation_timeout,
            extraction_timeout,
            close_timeout: BrowserConfig::default().close_timeout(),
        }
    }

    /// Bound how long releasing a session may take.
    #[must_use]
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Scrape the device page at `target_url`.
    ///
    /// # Errors
    /// Returns a `ScrapeError`; use [`ScrapeError::failure_kind`] to decide
    /// whether the attempt is retried.
    pub async fn execute(
        &self,
        target_url: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<DevicePage> {
        url::Url::parse(target_url)
            .map_err(|e| ScrapeError::InvalidTarget(format!("{target_url}: {e}")))?;

        progress
            .report(ScrapeStage::Navigating, &format!("opening {target_url}"))
            .await;

        let mut session = guarded(cancel, "session", self.navigation_timeout, async {
            self.sessions.open().await.map_err(ScrapeError::from)
        })
        .await?;

        let outcome = self.run(session.as_mut(), target_url, progress, cancel).await;

        match tokio::time::timeout(self.close_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("Failed to close browser session for {}: {}", target_url, e);
            }
            Err(_) => tracing::warn!(
                "Browser session for {} did not close within {:?}, abandoning it",
                target_url,
                self.close_timeout
            ),
        }

        let page = outcome?;
        progress
            .report(ScrapeStage::Done, &format!("extracted {}", page.name))
            .await;
        Ok(page)
    }

    async fn run(
        &self,
        session: &mut dyn PageSession,
        target_url: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<DevicePage> {
        guarded(cancel, "navigation", self.navigation_timeout, async {
            session.navigate(target_url).await.map_err(ScrapeError::from)
        })
        .await?;

        progress
            .report(ScrapeStage::Validating, "checking page content")
            .await;

        // Reading, validating and parsing share one extraction budget.
        guarded(cancel, "extraction", self.extraction_timeout, async {
            let html = session.content().await.map_err(ScrapeError::from)?;

            if let Verdict::Rejected { kind, reason } = validate(&html) {
                tracing::warn!("Page {} rejected ({}): {}", target_url, kind, reason);
                return Err(ScrapeError::Rejected { kind, reason });
            }

            progress
                .report(ScrapeStage::Extracting, "parsing spec sheet")
                .await;

            let url = target_url.to_string();
            tokio::task::spawn_blocking(move || extract_device(&html, &url))
                .await
                .map_err(|e| ScrapeError::Extraction(format!("extraction task failed: {e}")))?
        })
        .await
    }
}

/// Run `fut` under a wall-clock budget, aborting early on cancellation.
async fn guarded<T>(
    cancel: &CancellationToken,
    stage: &'static str,
    budget: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        () = cancel.cancelled() => Err(ScrapeError::Cancelled),
        outcome = tokio::time::timeout(budget, fut) => {
            outcome.unwrap_or(Err(ScrapeError::Timeout { stage, after: budget }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specforge_browser::BrowserError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const GOOD: &str = r#"<html><body><div id="body">
        <h1 class="specs-phone-name-title">Apple iPhone 15</h1>
        <div id="specs-list"><table><tr><th>Display</th><td class="ttl">Size</td><td class="nfo">6.1 inches</td></tr></table></div>
    </div></body></html>"#;

    #[derive(Clone, Copy)]
    enum Behavior {
        Serve(&'static str),
        FailNavigation,
        Hang,
        StallContent,
        HangClose(&'static str),
    }

    struct FakeSessions {
        behavior: Behavior,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl FakeSessions {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                opened: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct FakePage {
        behavior: Behavior,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageSession for FakePage {
        async fn navigate(&mut self, _url: &str) -> specforge_browser::Result<()> {
            match self.behavior {
                Behavior::FailNavigation => Err(BrowserError::Navigation(
                    "net::ERR_TUNNEL_CONNECTION_FAILED".into(),
                )),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
                Behavior::Serve(_) | Behavior::StallContent | Behavior::HangClose(_) => Ok(()),
            }
        }

        async fn content(&mut self) -> specforge_browser::Result<String> {
            match self.behavior {
                Behavior::Serve(html) | Behavior::HangClose(html) => Ok(html.to_string()),
                Behavior::StallContent => {
                    std::future::pending::<()>().await;
                    Err(BrowserError::Closed)
                }
                _ => Err(BrowserError::Closed),
            }
        }

        async fn close(self: Box<Self>) -> specforge_browser::Result<()> {
            if let Behavior::HangClose(_) = self.behavior {
                std::future::pending::<()>().await;
            }
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl SessionProvider for FakeSessions {
        async fn open(&self) -> specforge_browser::Result<Box<dyn PageSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakePage {
                behavior: self.behavior,
                closed: self.closed.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ScrapeStage>>);

    #[async_trait]
    impl ProgressReporter for Recorder {
        async fn report(&self, stage: ScrapeStage, _message: &str) {
            self.0.lock().unwrap().push(stage);
        }
    }

    fn executor(sessions: &Arc<FakeSessions>) -> ScrapeExecutor {
        ScrapeExecutor::with_timeouts(
            sessions.clone(),
            Duration::from_secs(30),
            Duration::from_secs(15),
        )
    }

    const URL: &str = "https://www.gsmarena.com/apple_iphone_15-12559.php";

    #[tokio::test]
    async fn test_success_reports_increasing_stages() {
        let sessions = Arc::new(FakeSessions::new(Behavior::Serve(GOOD)));
        let recorder = Recorder::default();

        let page = executor(&sessions)
            .execute(URL, &recorder, &CancellationToken::new())
            .await
            .expect("scrape");

        assert_eq!(page.name, "Apple iPhone 15");
        let stages = recorder.0.lock().unwrap().clone();
        assert_eq!(
            stages,
            vec![
                ScrapeStage::Navigating,
                ScrapeStage::Validating,
                ScrapeStage::Extracting,
                ScrapeStage::Done
            ]
        );
        assert!(stages.windows(2).all(|w| w[0].percent() < w[1].percent()));
        assert_eq!(sessions.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_closes_session() {
        let sessions = Arc::new(FakeSessions::new(Behavior::Serve(
            "<html><title>Just a moment...</title></html>",
        )));

        let err = executor(&sessions)
            .execute(URL, &NoopProgress, &CancellationToken::new())
            .await
            .expect_err("bot wall");

        assert!(matches!(err, ScrapeError::Rejected { .. }));
        assert!(err.is_retryable());
        assert_eq!(sessions.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_navigation_failure_closes_session() {
        let sessions = Arc::new(FakeSessions::new(Behavior::FailNavigation));

        let err = executor(&sessions)
            .execute(URL, &NoopProgress, &CancellationToken::new())
            .await
            .expect_err("navigation");

        assert_eq!(err.failure_kind(), specforge_core::FailureKind::Transport);
        assert_eq!(sessions.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_timeout_is_validation_failure() {
        let sessions = Arc::new(FakeSessions::new(Behavior::Hang));

        let err = executor(&sessions)
            .execute(URL, &NoopProgress, &CancellationToken::new())
            .await
            .expect_err("timeout");

        assert!(matches!(err, ScrapeError::Timeout { stage: "navigation", .. }));
        assert_eq!(err.failure_kind(), specforge_core::FailureKind::Validation);
        assert_eq!(sessions.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_extraction_times_out() {
        let sessions = Arc::new(FakeSessions::new(Behavior::StallContent));

        let err = executor(&sessions)
            .execute(URL, &NoopProgress, &CancellationToken::new())
            .await
            .expect_err("timeout");

        assert!(matches!(err, ScrapeError::Timeout { stage: "extraction", .. }));
        assert!(err.is_retryable());
        assert_eq!(sessions.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_close_is_abandoned() {
        let sessions = Arc::new(FakeSessions::new(Behavior::HangClose(GOOD)));
        let started = tokio::time::Instant::now();

        let page = executor(&sessions)
            .with_close_timeout(Duration::from_secs(5))
            .execute(URL, &NoopProgress, &CancellationToken::new())
            .await
            .expect("scrape");

        assert_eq!(page.name, "Apple iPhone 15");
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(sessions.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_session() {
        let sessions = Arc::new(FakeSessions::new(Behavior::Hang));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = executor(&sessions)
            .execute(URL, &NoopProgress, &cancel)
            .await
            .expect_err("cancelled");

        assert!(matches!(err, ScrapeError::Cancelled));
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_target_opens_nothing() {
        let sessions = Arc::new(FakeSessions::new(Behavior::Serve(GOOD)));

        let err = executor(&sessions)
            .execute("not a url", &NoopProgress, &CancellationToken::new())
            .await
            .expect_err("invalid");

        assert!(matches!(err, ScrapeError::InvalidTarget(_)));
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 0);
    }
}
