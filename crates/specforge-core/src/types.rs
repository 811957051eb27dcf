//! Shared types used across specforge.
//!
//! This module defines common newtypes and enums that provide type safety
//! and clear domain modeling.

use crate::error::SpecforgeError;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Length of a derived device identifier, in hex characters.
pub const DEVICE_ID_LEN: usize = 16;

/// Newtype for internal device identifiers.
///
/// Device IDs are lowercase alphanumeric (plus `-`/`_`), 1-64 characters.
/// IDs derived from a source slug are always 16 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a `DeviceId` from a caller-supplied string.
    ///
    /// # Errors
    /// Returns error if the ID doesn't match the required format.
    pub fn new(id: impl Into<String>) -> Result<Self, SpecforgeError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Derive the device ID for a source-specific canonical slug.
    ///
    /// The same `(source, slug)` always maps to the same ID, so no lookup is
    /// needed to find a device's internal identity.
    #[must_use]
    pub fn from_slug(source: &str, slug: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(b":");
        hasher.update(slug.trim().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..DEVICE_ID_LEN].to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), SpecforgeError> {
        static DEVICE_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = DEVICE_REGEX
            .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("valid regex"));

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(SpecforgeError::Validation(format!(
                "invalid device ID: must be 1-64 lowercase alphanumeric characters, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle step of a scrape job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    /// Resolving the free-text query to a target
    Searching,
    /// Waiting for the caller to pick one of several candidates
    Selecting,
    /// Driving the browser against the confirmed target
    Scraping,
    /// Extraction succeeded and was stored
    Done,
    /// Failed after the attempt budget, or failed non-retryably
    Error,
    /// Target already belongs to a different device
    SlugConflict,
    /// Abandoned by a crashed worker or cancelled
    Interrupted,
}

impl JobStep {
    /// Steps that still hold the device's single active-job slot.
    pub const ACTIVE: [JobStep; 3] = [Self::Searching, Self::Selecting, Self::Scraping];

    /// Wire/database representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Searching => "searching",
            Self::Selecting => "selecting",
            Self::Scraping => "scraping",
            Self::Done => "done",
            Self::Error => "error",
            Self::SlugConflict => "slug_conflict",
            Self::Interrupted => "interrupted",
        }
    }

    /// Whether the job can never move again without a new caller request.
    ///
    /// `slug_conflict` is included: it only resolves through a new job.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !Self::ACTIVE.contains(self)
    }

    /// Whether `self -> next` is an edge of the job lifecycle.
    #[must_use]
    pub fn can_transition_to(&self, next: JobStep) -> bool {
        use JobStep::{Done, Error, Interrupted, Scraping, Searching, Selecting, SlugConflict};
        matches!(
            (self, next),
            (Searching, Selecting | Scraping | Error | SlugConflict | Interrupted)
                | (Selecting, Scraping | SlugConflict | Interrupted)
                | (Scraping, Done | Error | Interrupted)
        )
    }
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStep {
    type Err = SpecforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "searching" => Ok(Self::Searching),
            "selecting" => Ok(Self::Selecting),
            "scraping" => Ok(Self::Scraping),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            "slug_conflict" => Ok(Self::SlugConflict),
            "interrupted" => Ok(Self::Interrupted),
            other => Err(SpecforgeError::Validation(format!(
                "unknown job step '{other}'"
            ))),
        }
    }
}

/// Coarse progress stages reported while scraping a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStage {
    /// Opening the session and loading the page
    Navigating,
    /// Running the content validator
    Validating,
    /// Parsing structured fields
    Extracting,
    /// Payload ready
    Done,
}

impl ScrapeStage {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigating => "navigating",
            Self::Validating => "validating",
            Self::Extracting => "extracting",
            Self::Done => "done",
        }
    }

    /// Percent-complete reported on entering this stage. Strictly increasing.
    #[must_use]
    pub fn percent(&self) -> u8 {
        match self {
            Self::Navigating => 10,
            Self::Validating => 45,
            Self::Extracting => 70,
            Self::Done => 100,
        }
    }
}

impl fmt::Display for ScrapeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a job-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or proxy failure
    Transport,
    /// Page content rejected or timed out
    Validation,
    /// Duplicate active job or slug conflict
    Conflict,
    /// Missing credentials or settings
    Configuration,
    /// Malformed upstream response
    Parse,
}

impl FailureKind {
    /// Whether a failure of this kind consumes an attempt and is retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport | Self::Validation)
    }

    /// Database representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Configuration => "configuration",
            Self::Parse => "parse",
        }
    }
}

impl FromStr for FailureKind {
    type Err = SpecforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport" => Ok(Self::Transport),
            "validation" => Ok(Self::Validation),
            "conflict" => Ok(Self::Conflict),
            "configuration" => Ok(Self::Configuration),
            "parse" => Ok(Self::Parse),
            other => Err(SpecforgeError::Validation(format!(
                "unknown failure kind '{other}'"
            ))),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
///
/// Persisted as fixed-width RFC3339 (`2026-01-01T00:00:00.000Z`) so that
/// string comparison in SQL orders timestamps correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, SpecforgeError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| SpecforgeError::Validation(format!("invalid timestamp: {e}")))
    }

    /// Format as fixed-width RFC3339 with millisecond precision.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Shift by a signed number of milliseconds.
    #[must_use]
    pub fn plus_millis(&self, millis: i64) -> Self {
        Self(self.0 + chrono::Duration::milliseconds(millis))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}
