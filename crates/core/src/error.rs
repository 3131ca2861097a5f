//! Core error types for tabrelay configuration and shared vocabulary.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file '{path}': {reason}")]
    ConfigReadFailed { path: PathBuf, reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid event name '{name}': {reason}")]
    InvalidEventName { name: String, reason: String },
}

impl Error {
    /// Create a config read error.
    pub fn config_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid event name error.
    pub fn invalid_event_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEventName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
