//! Browser session provider for device page scraping.
//!
//! Opens one browser per scrape attempt, either against an authenticated
//! remote CDP endpoint or a locally launched Chromium, and installs a
//! network-level rule that aborts image, font, media and stylesheet
//! requests before the first navigation.

pub mod actions;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod intercept;

pub use actions::{PageSession, SessionProvider};
pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
