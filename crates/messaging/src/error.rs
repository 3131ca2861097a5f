//! Error types for relay operations.
//!
//! Only transport-level failures reach a caller as errors. Handler failures
//! travel as data and surface here as [`RelayError::Remote`] on the caller.

use tabrelay_core::{ContextKind, EventName};
use tabrelay_ipc::{RemoteError, TransportError};
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay error types.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No context has a handler for the event.
    #[error("No handler registered for '{event}'")]
    NoHandler { event: EventName },

    /// The handler ran and failed; Display is the handler's own message.
    #[error("{message}")]
    Remote {
        message: String,
        stack: Option<String>,
    },

    /// The coordinator never acknowledged the request.
    #[error("relay did not acknowledge '{event}' within {timeout_ms}ms")]
    AckTimeout { event: EventName, timeout_ms: u64 },

    /// The request was acknowledged but no handler responded in time.
    #[error("handler for '{event}' did not respond within {timeout_ms}ms")]
    ResponseTimeout { event: EventName, timeout_ms: u64 },

    /// A broadcast did not collect every reply in time.
    #[error("broadcast '{event}' timed out after {timeout_ms}ms")]
    AggregationTimeout { event: EventName, timeout_ms: u64 },

    /// The channel needs a target tab and none was given.
    #[error("'{event}' requires a target tab")]
    MissingTarget { event: EventName },

    /// This context already has a handler for the event on the same route.
    #[error("a handler is already registered for '{event}'")]
    DuplicateHandler { event: EventName },

    /// The operation cannot run in this kind of context.
    #[error("'{operation}' is not available in {context}")]
    WrongContext {
        operation: &'static str,
        context: ContextKind,
    },

    /// The event name carries no known direct channel prefix.
    #[error("'{event}' does not name a direct channel")]
    UnknownChannel { event: EventName },

    /// The owning context was torn down before the call settled.
    #[error("context closed before '{event}' settled")]
    ContextClosed { event: EventName },

    /// Arguments or results did not match the expected shape.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Configuration or event name validation failed.
    #[error(transparent)]
    Core(#[from] tabrelay_core::Error),

    /// The runtime refused or failed a delivery.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Discriminant of a [`RelayError`], for matching without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoHandler,
    Remote,
    AckTimeout,
    ResponseTimeout,
    AggregationTimeout,
    MissingTarget,
    DuplicateHandler,
    WrongContext,
    UnknownChannel,
    ContextClosed,
    Serialization,
    Core,
    Transport,
}

impl RelayError {
    /// Create a no handler error.
    pub fn no_handler(event: &EventName) -> Self {
        Self::NoHandler {
            event: event.clone(),
        }
    }

    /// Create an acknowledgment timeout error.
    pub fn ack_timeout(event: &EventName, timeout_ms: u64) -> Self {
        Self::AckTimeout {
            event: event.clone(),
            timeout_ms,
        }
    }

    /// Create a response timeout error.
    pub fn response_timeout(event: &EventName, timeout_ms: u64) -> Self {
        Self::ResponseTimeout {
            event: event.clone(),
            timeout_ms,
        }
    }

    /// Create an aggregation timeout error.
    pub fn aggregation_timeout(event: &EventName, timeout_ms: u64) -> Self {
        Self::AggregationTimeout {
            event: event.clone(),
            timeout_ms,
        }
    }

    /// Create a missing target error.
    pub fn missing_target(event: &EventName) -> Self {
        Self::MissingTarget {
            event: event.clone(),
        }
    }

    /// Create a duplicate handler error.
    pub fn duplicate_handler(event: &EventName) -> Self {
        Self::DuplicateHandler {
            event: event.clone(),
        }
    }

    /// Create a wrong context error.
    pub fn wrong_context(operation: &'static str, context: ContextKind) -> Self {
        Self::WrongContext { operation, context }
    }

    /// Create an unknown channel error.
    pub fn unknown_channel(event: &EventName) -> Self {
        Self::UnknownChannel {
            event: event.clone(),
        }
    }

    /// Create a context closed error.
    pub fn context_closed(event: &EventName) -> Self {
        Self::ContextClosed {
            event: event.clone(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Convert a handler failure received for `event`.
    ///
    /// The explicit "no handler" marker becomes [`RelayError::NoHandler`];
    /// anything else keeps the handler's message and stack.
    pub fn from_remote(event: &EventName, error: RemoteError) -> Self {
        if error.is_no_handler() {
            return Self::no_handler(event);
        }
        Self::Remote {
            message: error.message,
            stack: error.stack,
        }
    }

    /// Get the error discriminant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoHandler { .. } => ErrorKind::NoHandler,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::AckTimeout { .. } => ErrorKind::AckTimeout,
            Self::ResponseTimeout { .. } => ErrorKind::ResponseTimeout,
            Self::AggregationTimeout { .. } => ErrorKind::AggregationTimeout,
            Self::MissingTarget { .. } => ErrorKind::MissingTarget,
            Self::DuplicateHandler { .. } => ErrorKind::DuplicateHandler,
            Self::WrongContext { .. } => ErrorKind::WrongContext,
            Self::UnknownChannel { .. } => ErrorKind::UnknownChannel,
            Self::ContextClosed { .. } => ErrorKind::ContextClosed,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Core(_) => ErrorKind::Core,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Check if this is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AckTimeout | ErrorKind::ResponseTimeout | ErrorKind::AggregationTimeout
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
