//! Core error types for specforge.
//!
//! This module defines the central error type used across all subsystems.
//! Each subsystem error is represented as a variant for clear error propagation.

use thiserror::Error;

/// Central error type for specforge operations.
#[derive(Error, Debug)]
pub enum SpecforgeError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database errors (connection, queries, migrations)
    #[error("database error: {0}")]
    Database(String),

    /// Browser automation errors (connect, navigation)
    #[error("browser error: {0}")]
    Browser(String),

    /// Network errors (HTTP requests, DNS)
    #[error("network error: {0}")]
    Network(String),

    /// Validation errors (invalid input, constraints)
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration-specific errors.
///
/// Any of these at startup is fatal; they never surface per job.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading/writing config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required credential or setting is absent
    #[error("missing required setting {field}: {hint}")]
    Missing {
        /// Field name
        field: String,
        /// How to supply it
        hint: String,
    },

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias using `SpecforgeError`.
pub type Result<T> = std::result::Result<T, SpecforgeError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SpecforgeError::Validation("empty slug".to_string());
        assert_eq!(err.to_string(), "validation error: empty slug");

        let err = ConfigError::Missing {
            field: "browser.token".to_string(),
            hint: "set SPECFORGE_BROWSER_TOKEN".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing required setting browser.token: set SPECFORGE_BROWSER_TOKEN"
        );
    }

    #[test]
    fn test_error_from_config() {
        let config_err = ConfigError::NoConfigDir;
        let err: SpecforgeError = config_err.into();
        assert!(matches!(err, SpecforgeError::Config(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: SpecforgeError = io_err.into();
        assert!(matches!(err, SpecforgeError::Io(_)));
    }
}
