use crate::error::{BrowserError, Result};

/// A single page inside a browser session.
///
/// A session lives for exactly one scrape attempt. Callers must call
/// [`PageSession::close`] on every path, including errors.
#[async_trait::async_trait]
pub trait PageSession: Send {
    /// Navigate to a URL and wait for the load to finish
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Current document HTML
    async fn content(&mut self) -> Result<String>;

    /// Close the page and the browser connection behind it
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Source of fresh browser sessions.
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open a new session with resource blocking already installed
    async fn open(&self) -> Result<Box<dyn PageSession>>;
}

/// Helper to extract domain from URL
pub fn extract_domain(url: &str) -> Result<String> {
    let url =
        url::Url::parse(url).map_err(|e| BrowserError::InvalidUrl(format!("{url}: {e}")))?;

    url.host_str()
        .ok_or_else(|| BrowserError::InvalidUrl("no host in URL".to_string()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://www.gsmarena.com/apple_iphone_15-12559.php").unwrap(),
            "www.gsmarena.com"
        );
        assert_eq!(
            extract_domain("wss://farm.example.com:9222/devtools?token=abc").unwrap(),
            "farm.example.com"
        );
    }

    #[test]
    fn test_extract_domain_invalid() {
        assert!(matches!(
            extract_domain("not-a-url"),
            Err(BrowserError::InvalidUrl(_))
        ));
    }
}
