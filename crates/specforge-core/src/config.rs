//! Configuration management for specforge.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. Every retry, backoff and staleness
//! constant used by the engine is read from here.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Main application configuration.
///
/// This is loaded from `~/.config/specforge/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database location and pool settings
    pub database: DatabaseConfig,
    /// Remote/local browser settings
    pub browser: BrowserConfig,
    /// External device source endpoints
    pub source: SourceConfig,
    /// Search retry and fallback settings
    pub search: SearchConfig,
    /// Matching oracle settings
    pub oracle: OracleConfig,
    /// Job queue retry and staleness settings
    pub queue: QueueConfig,
    /// Worker pool settings
    pub workers: WorkerConfig,
    /// Protocol gateway settings
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Load configuration from the default path, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if absent.
    pub fn load_from(config_path: &Path) -> ConfigResult<Self> {
        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `SPECFORGE_DATABASE_PATH`: database file
    /// - `SPECFORGE_BROWSER_MODE`: `remote` or `local`
    /// - `SPECFORGE_BROWSER_ENDPOINT`: remote CDP endpoint
    /// - `SPECFORGE_BROWSER_TOKEN`: remote browser credential
    /// - `SPECFORGE_WORKERS`: worker pool size
    /// - `SPECFORGE_GATEWAY_ADDR`: gateway bind address
    /// - `SPECFORGE_ORACLE_API_KEY`: matching oracle credential
    pub fn load_with_env(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Split out from [`AppConfig::load_with_env`] so the mapping can be
    /// exercised without touching the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("SPECFORGE_DATABASE_PATH") {
            tracing::debug!("Override database.path from env: {}", val);
            self.database.path = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("SPECFORGE_BROWSER_MODE") {
            match val.as_str() {
                "remote" => self.browser.mode = BrowserMode::Remote,
                "local" => self.browser.mode = BrowserMode::Local,
                other => tracing::warn!("Ignoring unknown SPECFORGE_BROWSER_MODE '{}'", other),
            }
        }

        if let Some(val) = lookup("SPECFORGE_BROWSER_ENDPOINT") {
            tracing::debug!("Override browser.endpoint from env");
            self.browser.endpoint = Some(val);
        }

        if let Some(val) = lookup("SPECFORGE_BROWSER_TOKEN") {
            self.browser.token = Some(SecretString::new(val));
        }

        if let Some(val) = lookup("SPECFORGE_WORKERS") {
            if let Ok(count) = val.parse() {
                self.workers.count = count;
                tracing::debug!("Override workers.count from env: {}", count);
            }
        }

        if let Some(val) = lookup("SPECFORGE_GATEWAY_ADDR") {
            tracing::debug!("Override gateway.bind_addr from env: {}", val);
            self.gateway.bind_addr = val;
        }

        if let Some(val) = lookup("SPECFORGE_ORACLE_API_KEY") {
            self.oracle.api_key = Some(SecretString::new(val));
        }
    }

    /// Check the settings that must hold before anything starts.
    ///
    /// # Errors
    /// Returns the first missing credential or out-of-range value found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.browser.mode == BrowserMode::Remote {
            if self.browser.endpoint.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Missing {
                    field: "browser.endpoint".to_string(),
                    hint: "set SPECFORGE_BROWSER_ENDPOINT or use browser.mode = \"local\""
                        .to_string(),
                });
            }
            if self.browser.token.as_ref().map_or(true, SecretString::is_empty) {
                return Err(ConfigError::Missing {
                    field: "browser.token".to_string(),
                    hint: "set SPECFORGE_BROWSER_TOKEN".to_string(),
                });
            }
        }

        if self.oracle.kind == OracleKind::Llm
            && self.oracle.api_key.as_ref().map_or(true, SecretString::is_empty)
        {
            return Err(ConfigError::Missing {
                field: "oracle.api_key".to_string(),
                hint: "set SPECFORGE_ORACLE_API_KEY or use oracle.kind = \"heuristic\"".to_string(),
            });
        }

        if self.workers.count == 0 {
            return Err(invalid("workers.count", "must be at least 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(invalid("queue.max_attempts", "must be at least 1"));
        }
        if self.search.max_retries == 0 {
            return Err(invalid("search.max_retries", "must be at least 1"));
        }
        if self.queue.retry_max_delay_ms < self.queue.retry_base_delay_ms {
            return Err(invalid(
                "queue.retry_max_delay_ms",
                "must not be smaller than queue.retry_base_delay_ms",
            ));
        }
        if !self.source.device_url_template.contains("{slug}") {
            return Err(invalid(
                "source.device_url_template",
                "must contain a {slug} placeholder",
            ));
        }

        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist. Credentials are never written.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| invalid("config_path", "no parent directory"))?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/specforge/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/specforge`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Database file, defaulting to `<data_dir>/specforge.db`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("specforge.db")),
        }
    }

    /// Directory for pre-normalization snapshots, defaulting to `<data_dir>/snapshots`.
    pub fn snapshot_dir(&self) -> ConfigResult<PathBuf> {
        match &self.database.snapshot_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("snapshots")),
        }
    }
}

fn project_dirs() -> ConfigResult<ProjectDirs> {
    ProjectDirs::from("dev", "specforge", "specforge").ok_or(ConfigError::NoConfigDir)
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// A credential that is zeroized on drop, redacted in `Debug` and never serialized.
#[derive(Clone, Default)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    /// Wrap a credential.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the credential.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Whether the credential is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file (defaults under the data directory)
    pub path: Option<PathBuf>,
    /// Where normalization snapshots are written
    pub snapshot_dir: Option<PathBuf>,
    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            snapshot_dir: None,
            max_connections: 5,
        }
    }
}

/// How browser sessions are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserMode {
    /// Connect to an authenticated remote CDP endpoint (proxy farm)
    Remote,
    /// Launch a local browser (development)
    Local,
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Remote or local sessions
    pub mode: BrowserMode,
    /// Remote CDP websocket endpoint
    pub endpoint: Option<String>,
    /// Remote endpoint credential
    #[serde(skip_serializing)]
    pub token: Option<SecretString>,
    /// Run the local browser headless
    pub headless: bool,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Content read + extraction timeout in seconds
    pub extraction_timeout_secs: u64,
    /// Session close timeout in seconds
    pub close_timeout_secs: u64,
}

impl BrowserConfig {
    /// Navigation timeout as a `Duration`.
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Extraction timeout as a `Duration`.
    #[must_use]
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    /// Session close timeout as a `Duration`.
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            mode: BrowserMode::Remote,
            endpoint: None,
            token: None,
            headless: false,
            navigation_timeout_secs: 30,
            extraction_timeout_secs: 15,
            close_timeout_secs: 10,
        }
    }
}

/// External device source endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source name stored alongside every payload
    pub name: String,
    /// Device page URL; `{slug}` is replaced by the canonical target id
    pub device_url_template: String,
    /// Catalog-search endpoint; receives `?q=<query>`
    pub search_url: String,
    /// Full catalog enumeration endpoint used when search is too broad
    pub enumeration_url: String,
}

impl SourceConfig {
    /// Device page URL for a canonical target id.
    #[must_use]
    pub fn device_url(&self, target_id: &str) -> String {
        self.device_url_template.replace("{slug}", target_id)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: "gsmarena".to_string(),
            device_url_template: "https://www.gsmarena.com/{slug}.php".to_string(),
            search_url: "https://www.gsmarena.com/api/search".to_string(),
            enumeration_url: "https://www.gsmarena.com/api/devices".to_string(),
        }
    }
}

/// Search retry and fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Attempts against the search source before giving up
    pub max_retries: u32,
    /// Fixed delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Result count at which enumeration fallback kicks in
    pub fallback_threshold: usize,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

impl SearchConfig {
    /// Delay between attempts as a `Duration`.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            fallback_threshold: 8,
            request_timeout_secs: 20,
        }
    }
}

/// Which matching oracle disambiguates search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleKind {
    /// Always leave ambiguity to the caller
    None,
    /// Local name-matching heuristic
    Heuristic,
    /// OpenAI-compatible chat completion endpoint
    Llm,
}

/// Matching oracle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Oracle implementation
    pub kind: OracleKind,
    /// Chat completions base URL for `llm`
    pub api_url: String,
    /// Model name for `llm`
    pub model: String,
    /// Credential for `llm`
    #[serde(skip_serializing)]
    pub api_key: Option<SecretString>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: OracleKind::Heuristic,
            api_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

/// Job queue retry and staleness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts per job before it becomes `error`
    pub max_attempts: u32,
    /// First retry delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Cap on the exponential retry delay in milliseconds
    pub retry_max_delay_ms: u64,
    /// Age after which an unclaimed active job is considered abandoned
    pub stale_after_secs: u64,
    /// How often the reaper runs
    pub reap_interval_secs: u64,
    /// Idle worker poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    /// Capped exponential delay before attempt `attempt + 1` (1-based `attempt`).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .retry_base_delay_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Staleness threshold as a `Duration`.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 5_000,
            retry_max_delay_ms: 300_000,
            stale_after_secs: 600,
            reap_interval_secs: 60,
            poll_interval_ms: 500,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent workers; bounded by remote browser capacity
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: 2 }
    }
}

/// Protocol gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address
    pub bind_addr: String,
    /// Longest accepted request line in bytes
    pub max_line_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7411".to_string(),
            max_line_bytes: 1024 * 1024,
        }
    }
}
