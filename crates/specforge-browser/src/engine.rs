use crate::actions::{extract_domain, PageSession, SessionProvider};
use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use crate::intercept::install_resource_blocking;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::handler::Handler;
use chromiumoxide::Page;
use futures::StreamExt;
use specforge_core::{BrowserConfig, BrowserMode};
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

/// Opens browser sessions according to [`BrowserConfig`].
///
/// Remote mode connects to the proxy farm's CDP endpoint with the
/// configured credential. Local mode launches Chromium, headful unless
/// `headless` is set, for development.
pub struct BrowserEngine {
    config: BrowserConfig,
}

impl BrowserEngine {
    /// Create an engine; no connection is made until [`SessionProvider::open`]
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    /// Endpoint with the credential attached as a `token` query parameter.
    fn remote_url(&self) -> Result<Zeroizing<String>> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or_else(|| BrowserError::InvalidUrl("no remote endpoint configured".into()))?;

        let mut url = url::Url::parse(endpoint)
            .map_err(|e| BrowserError::InvalidUrl(format!("remote endpoint: {e}")))?;
        if let Some(token) = &self.config.token {
            url.query_pairs_mut().append_pair("token", token.expose());
        }

        Ok(Zeroizing::new(url.to_string()))
    }

    async fn connect_remote(&self) -> Result<(Browser, Handler)> {
        let url = self.remote_url()?;
        let host = extract_domain(&url)?;
        tracing::debug!("Connecting to remote browser at {}", host);

        tokio::time::timeout(
            self.config.navigation_timeout(),
            Browser::connect(url.as_str()),
        )
        .await
        .map_err(|_| BrowserError::Timeout(format!("connecting to {host}")))?
        .map_err(|e| BrowserError::Connect(e.to_string()))
    }

    async fn launch_local(&self) -> Result<(Browser, Handler)> {
        let fingerprint = FingerprintConfig::randomized();
        tracing::debug!(
            "Launching local browser ({}x{}, headless: {})",
            fingerprint.viewport_width,
            fingerprint.viewport_height,
            self.config.headless
        );

        let mut builder = ChromiumConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height)
            .args(fingerprint.launch_args());
        if !self.config.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))
    }
}

#[async_trait::async_trait]
impl SessionProvider for BrowserEngine {
    async fn open(&self) -> Result<Box<dyn PageSession>> {
        let (browser, mut handler) = match self.config.mode {
            BrowserMode::Remote => self.connect_remote().await?,
            BrowserMode::Local => self.launch_local().await?,
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler error: {}", e);
                }
            }
        });

        let mut session = ChromiumSession {
            browser,
            handler: handler_task,
            page: None,
            interceptor: None,
            local: self.config.mode == BrowserMode::Local,
        };

        if let Err(e) = session.attach_page().await {
            if let Err(close_err) = Box::new(session).close().await {
                tracing::warn!("Failed to close half-open session: {}", close_err);
            }
            return Err(e);
        }

        Ok(Box::new(session))
    }
}

/// One browser connection with a single page.
struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
    interceptor: Option<JoinHandle<()>>,
    local: bool,
}

impl ChromiumSession {
    async fn attach_page(&mut self) -> Result<()> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Chromium(format!("new page: {e}")))?;

        self.interceptor = Some(install_resource_blocking(&page).await?);
        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Result<&Page> {
        self.page.as_ref().ok_or(BrowserError::Closed)
    }
}

#[async_trait::async_trait]
impl PageSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        tracing::debug!("Navigating to {}", extract_domain(url)?);
        self.page()?
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        self.page()?
            .content()
            .await
            .map_err(|e| BrowserError::Content(e.to_string()))
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let mut first_error = None;

        if let Some(task) = self.interceptor.take() {
            task.abort();
        }
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                first_error.get_or_insert(BrowserError::Chromium(format!("close page: {e}")));
            }
        }
        if let Err(e) = self.browser.close().await {
            first_error.get_or_insert(BrowserError::Chromium(format!("close browser: {e}")));
        }
        if self.local {
            if let Err(e) = self.browser.wait().await {
                tracing::debug!("Local browser did not exit cleanly: {}", e);
            }
        }
        self.handler.abort();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(task) = &self.interceptor {
            task.abort();
        }
        self.handler.abort();
    }
}
