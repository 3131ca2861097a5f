//! Relay configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Largest message the host runtime will carry (64 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Timeouts and naming used by every relay instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Deadline for the coordinator's acknowledgment of a request.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Deadline for the final response once acknowledged.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Deadline for a one-to-many aggregation to complete.
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,

    /// Prefix of port names that carry broadcast traffic.
    #[serde(default = "default_broadcast_port_prefix")]
    pub broadcast_port_prefix: String,

    /// Largest serialized payload accepted for delivery.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            broadcast_port_prefix: default_broadcast_port_prefix(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl RelayConfig {
    /// Parse a configuration from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the values are invalid.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout_ms == 0 {
            return Err(Error::invalid_config("ack_timeout_ms must be greater than 0"));
        }

        if self.response_timeout_ms == 0 {
            return Err(Error::invalid_config(
                "response_timeout_ms must be greater than 0",
            ));
        }

        if self.broadcast_timeout_ms == 0 {
            return Err(Error::invalid_config(
                "broadcast_timeout_ms must be greater than 0",
            ));
        }

        if self.broadcast_port_prefix.is_empty() {
            return Err(Error::invalid_config(
                "broadcast_port_prefix must not be empty",
            ));
        }

        if self.max_message_bytes == 0 {
            return Err(Error::invalid_config(
                "max_message_bytes must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Acknowledgment deadline.
    #[must_use]
    pub const fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Response deadline after acknowledgment.
    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Broadcast aggregation deadline.
    #[must_use]
    pub const fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Builder-style override of the acknowledgment deadline.
    #[must_use]
    pub fn with_ack_timeout_ms(mut self, ms: u64) -> Self {
        self.ack_timeout_ms = ms;
        self
    }

    /// Builder-style override of the response deadline.
    #[must_use]
    pub fn with_response_timeout_ms(mut self, ms: u64) -> Self {
        self.response_timeout_ms = ms;
        self
    }

    /// Builder-style override of the broadcast deadline.
    #[must_use]
    pub fn with_broadcast_timeout_ms(mut self, ms: u64) -> Self {
        self.broadcast_timeout_ms = ms;
        self
    }
}

fn default_ack_timeout_ms() -> u64 {
    100
}

fn default_response_timeout_ms() -> u64 {
    30_000
}

fn default_broadcast_timeout_ms() -> u64 {
    30_000
}

fn default_broadcast_port_prefix() -> String {
    "broadcast:".to_string()
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.ack_timeout(), Duration::from_millis(100));
        assert_eq!(config.broadcast_timeout(), Duration::from_secs(30));
        assert_eq!(config.broadcast_port_prefix, "broadcast:");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = RelayConfig::from_toml_str("ack_timeout_ms = 250\n").unwrap();
        assert_eq!(config.ack_timeout_ms, 250);
        assert_eq!(config.response_timeout_ms, 30_000);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = RelayConfig::from_toml_str("broadcast_timeout_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("broadcast_timeout_ms"));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let config = RelayConfig {
            broadcast_port_prefix: String::new(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = RelayConfig::from_toml_str("ack_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::TomlParseFailed { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "response_timeout_ms = 500").unwrap();
        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.response_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RelayConfig::load("/nonexistent/tabrelay.toml").unwrap_err();
        assert!(matches!(err, Error::ConfigReadFailed { .. }));
    }
}
