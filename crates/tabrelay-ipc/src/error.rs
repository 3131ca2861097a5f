//! Errors raised while moving a payload between contexts.
//!
//! None of these is fatal to the runtime; the caller decides whether to retry,
//! report or drop.

use tabrelay_core::{ContextId, TabId};

/// Delivery failure of the runtime layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Serialized payload exceeds the runtime's message budget.
    MessageTooLarge { size: usize, limit: usize },

    /// Payload could not be turned into JSON.
    SerializationFailed { reason: String },

    /// JSON did not match the expected message shape.
    DeserializationFailed { reason: String },

    /// Port was closed by either end, or its context went away.
    PortDisconnected { port: String },

    /// No content script is listening in the target tab.
    NoSuchTab { tab_id: TabId },

    /// The sending context is no longer attached to the runtime.
    ContextDetached { context_id: ContextId },
}

impl TransportError {
    /// Create an oversize payload error.
    pub fn message_too_large(size: usize, limit: usize) -> Self {
        Self::MessageTooLarge { size, limit }
    }

    /// Create a serialization error.
    pub fn serialization_failed(reason: impl Into<String>) -> Self {
        Self::SerializationFailed {
            reason: reason.into(),
        }
    }

    /// Create a deserialization error.
    pub fn deserialization_failed(reason: impl Into<String>) -> Self {
        Self::DeserializationFailed {
            reason: reason.into(),
        }
    }

    /// Create a disconnected port error.
    pub fn port_disconnected(port: impl Into<String>) -> Self {
        Self::PortDisconnected { port: port.into() }
    }

    /// Create a missing tab error.
    pub fn no_such_tab(tab_id: TabId) -> Self {
        Self::NoSuchTab { tab_id }
    }

    /// Create a detached context error.
    pub fn context_detached(context_id: ContextId) -> Self {
        Self::ContextDetached { context_id }
    }

    /// Check whether the other end is gone rather than the payload being bad.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::PortDisconnected { .. } | Self::NoSuchTab { .. } | Self::ContextDetached { .. }
        )
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageTooLarge { size, limit } => {
                write!(f, "payload of {size} bytes exceeds the {limit} byte budget")
            }
            Self::SerializationFailed { reason } => write!(f, "cannot encode payload: {reason}"),
            Self::DeserializationFailed { reason } => {
                write!(f, "cannot decode payload: {reason}")
            }
            Self::PortDisconnected { port } => write!(f, "port '{port}' is disconnected"),
            Self::NoSuchTab { tab_id } => write!(
                f,
                "could not establish connection: no receiving end in tab {tab_id}"
            ),
            Self::ContextDetached { context_id } => {
                write!(f, "context {context_id} is detached from the runtime")
            }
        }
    }
}

impl std::error::Error for TransportError {}

pub type TransportResult<T> = Result<T, TransportError>;
