//! Content validator.
//!
//! A pure classification of fetched HTML. Checks run in priority order:
//! bot-challenge markers first, so a challenge page that happens to embed
//! a valid-looking layout is still rejected.

use scraper::{Html, Selector};
use serde::Serialize;
use std::fmt;

/// Why a page was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Bot protection, verification prompt or access-denied page
    BotChallenge,
    /// No top-level content container
    Incomplete,
    /// Container present but the spec-sheet markers are missing
    WrongTemplate,
}

impl RejectionKind {
    /// Stable identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotChallenge => "bot_challenge",
            Self::Incomplete => "incomplete",
            Self::WrongTemplate => "wrong_template",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validator outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Safe to extract
    Accepted,
    /// Not usable
    Rejected {
        /// Rejection class
        kind: RejectionKind,
        /// Reason string recorded on the job
        reason: String,
    },
}

impl Verdict {
    fn rejected(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether the page was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Lowercased text fragments that only appear on challenge or block pages.
const BOT_MARKERS: &[(&str, &str)] = &[
    ("cf-browser-verification", "cloudflare browser verification"),
    ("challenge-platform", "cloudflare challenge platform"),
    ("cf-chl-", "cloudflare challenge"),
    ("just a moment...", "cloudflare interstitial"),
    ("checking your browser before accessing", "browser check interstitial"),
    ("verify you are human", "human verification prompt"),
    ("are you a robot", "human verification prompt"),
    ("g-recaptcha", "captcha wall"),
    ("h-captcha", "captcha wall"),
    ("px-captcha", "perimeterx captcha"),
    ("_incapsula_resource", "incapsula block"),
    ("please enable js and disable any ad blocker", "datadome javascript wall"),
    ("enable javascript and cookies to continue", "javascript and cookie wall"),
    ("<title>access denied</title>", "access denied page"),
    ("you don't have permission to access", "access denied page"),
    ("too many requests", "rate limit page"),
];

/// Top-level containers, any of which marks a fully rendered page.
const CONTAINERS: &[&str] = &["#body", "#main", "main", ".main"];

/// Markers that must all be present for spec-sheet extraction to work.
const STRUCTURAL_MARKERS: &[&str] = &["#specs-list", "#specs-list td.nfo"];

/// Classify fetched HTML.
#[must_use]
pub fn validate(html: &str) -> Verdict {
    let lowered = html.to_lowercase();
    if let Some((_, reason)) = BOT_MARKERS.iter().find(|(m, _)| lowered.contains(m)) {
        return Verdict::rejected(
            RejectionKind::BotChallenge,
            format!("bot protection detected: {reason}"),
        );
    }

    let document = Html::parse_document(html);

    if !CONTAINERS.iter().any(|sel| matches_any(&document, sel)) {
        return Verdict::rejected(RejectionKind::Incomplete, "content container not found");
    }

    if let Some(missing) = STRUCTURAL_MARKERS
        .iter()
        .find(|sel| !matches_any(&document, sel))
    {
        return Verdict::rejected(
            RejectionKind::WrongTemplate,
            format!("expected marker '{missing}' not found"),
        );
    }

    Verdict::Accepted
}

fn matches_any(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_PAGE: &str = r#"
        <html><body><div id="body">
            <h1 class="specs-phone-name-title">Apple iPhone 15</h1>
            <div id="specs-list">
                <table><tr><th>Display</th><td class="ttl">Size</td><td class="nfo">6.1 inches</td></tr></table>
            </div>
        </div></body></html>
    "#;

    #[test]
    fn test_accepts_device_page() {
        assert_eq!(validate(DEVICE_PAGE), Verdict::Accepted);
    }

    #[test]
    fn test_bot_marker_wins_over_valid_structure() {
        let html = DEVICE_PAGE.replace(
            "<div id=\"body\">",
            "<div id=\"body\"><div id=\"cf-browser-verification\"></div>",
        );
        match validate(&html) {
            Verdict::Rejected { kind, reason } => {
                assert_eq!(kind, RejectionKind::BotChallenge);
                assert!(reason.starts_with("bot protection detected"));
            }
            Verdict::Accepted => panic!("challenge page must be rejected"),
        }
    }

    #[test]
    fn test_access_denied_page() {
        let html = "<html><head><title>Access Denied</title></head><body>Reference #18</body></html>";
        assert!(matches!(
            validate(html),
            Verdict::Rejected {
                kind: RejectionKind::BotChallenge,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_container_is_incomplete() {
        let html = "<html><body><p>loading</p></body></html>";
        assert!(matches!(
            validate(html),
            Verdict::Rejected {
                kind: RejectionKind::Incomplete,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_spec_markers_is_wrong_template() {
        let html = r#"<html><body><div id="body"><div class="review-body">News</div></div></body></html>"#;
        match validate(html) {
            Verdict::Rejected { kind, reason } => {
                assert_eq!(kind, RejectionKind::WrongTemplate);
                assert!(reason.contains("#specs-list"));
            }
            Verdict::Accepted => panic!("news page must be rejected"),
        }
    }
}
