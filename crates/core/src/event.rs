//! Event names.
//!
//! Names should be namespaced (`"domain:action"`). Channel prefixes such as
//! `cs2bg:` are part of the name, so `cs2bg:ping` and `ep2cs:ping` are
//! unrelated events.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Name of a relayed event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventName(String);

impl EventName {
    /// Create an event name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or contains whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_event_name(name, "must not be empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_event_name(name, "must not contain whitespace"));
        }
        Ok(Self(name))
    }

    /// Create an event name by prepending a channel prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting name is invalid.
    pub fn prefixed(prefix: &str, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::invalid_event_name(
                format!("{prefix}{name}"),
                "suffix after prefix must not be empty",
            ));
        }
        Self::new(format!("{prefix}{name}"))
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace part before the first `:`, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once(':').map(|(ns, _)| ns)
    }

    /// Remainder after `prefix`, if the name starts with it.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &str) -> Option<&str> {
        self.0.strip_prefix(prefix)
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for EventName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for EventName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert!(EventName::new("").is_err());
        assert!(EventName::new("has space").is_err());
        assert!(EventName::new("tabs:query").is_ok());
    }

    #[test]
    fn test_prefixed_names_are_distinct() {
        let a = EventName::prefixed("cs2bg:", "ping");
        let b = EventName::prefixed("ep2cs:", "ping");
        assert!(a.is_ok() && b.is_ok());
        assert_ne!(a.ok(), b.ok());
    }

    #[test]
    fn test_prefixed_rejects_empty_suffix() {
        assert!(EventName::prefixed("cs2bg:", "").is_err());
    }

    #[test]
    fn test_namespace_and_strip_prefix() -> Result<()> {
        let name = EventName::new("cs2bg:tabs:query")?;
        assert_eq!(name.namespace(), Some("cs2bg"));
        assert_eq!(name.strip_prefix("cs2bg:"), Some("tabs:query"));
        assert_eq!(name.strip_prefix("ep2cs:"), None);
        Ok(())
    }
}
