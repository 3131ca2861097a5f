//! Result alias and logging combinators.
//!
//! Fire-and-forget sends inside the relay must never abort the caller, but
//! their failures still have to show up in the logs. These combinators turn a
//! failed `Result` into a logged `None` without unwrapping.

use std::fmt::Display;

use crate::error::Error;

/// The standard Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for Results whose error is only worth a log line.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error at `warn` if present.
    fn ok_logged(self, action: &str) -> Option<T>;

    /// Convert a Result to an Option, logging the error at `debug` if present.
    ///
    /// Use for failures that are expected during normal operation, such as a
    /// post to a port whose context already went away.
    fn ok_quiet(self, action: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T> for std::result::Result<T, E> {
    fn ok_logged(self, action: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(action, error = %e, "Operation failed");
                None
            }
        }
    }

    fn ok_quiet(self, action: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(action, error = %e, "Operation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_logged_passes_value_through() {
        let result: std::result::Result<i32, String> = Ok(42);
        assert_eq!(result.ok_logged("test"), Some(42));
    }

    #[test]
    fn test_ok_logged_swallows_error() {
        let result: Result<i32> = Err(Error::invalid_config("bad"));
        assert_eq!(result.ok_logged("test"), None);
    }

    #[test]
    fn test_ok_quiet_swallows_error() {
        let result: std::result::Result<i32, &str> = Err("gone");
        assert_eq!(result.ok_quiet("post"), None);
    }
}
