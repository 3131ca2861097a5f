//! The seam between the relay and the host runtime.
//!
//! The host runtime offers exactly two primitives:
//! - **A**: one-shot message to every extension context, or to the content
//!   scripts of one tab, yielding at most one reply
//! - **B**: a named long-lived [`Port`] to the background context
//!
//! Every relay instance talks to the runtime only through [`RuntimeTransport`],
//! so tests and the CLI can swap in [`crate::InMemoryRuntime`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tabrelay_core::{ContextId, ContextKind, SenderInfo, TabId};

use crate::{Port, TransportResult};

/// Target of a one-shot message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Every extension context (background and pages) except the sender.
    Extension,
    /// Content scripts of one tab.
    Tab(TabId),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extension => write!(f, "extension"),
            Self::Tab(tab_id) => write!(f, "tab {tab_id}"),
        }
    }
}

/// Receives one-shot messages delivered to a context.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Handle one delivered message.
    ///
    /// Returning `Some` offers a reply; the sender gets the first reply
    /// offered by any recipient. Returning `None` means "not for me".
    async fn on_message(&self, message: Value, sender: SenderInfo) -> Option<Value>;
}

/// Receives ports opened towards a context.
#[async_trait]
pub trait ConnectListener: Send + Sync {
    /// Take ownership of a newly accepted port.
    async fn on_connect(&self, port: Port);
}

/// Runtime capabilities available to one attached context.
#[async_trait]
pub trait RuntimeTransport: Send + Sync {
    /// Runtime identity of this context.
    fn context_id(&self) -> ContextId;

    /// Kind the context was attached as.
    fn kind(&self) -> ContextKind;

    /// Largest JSON payload the runtime accepts.
    fn max_message_bytes(&self) -> usize;

    /// Primitive A: send a message and await the first reply, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is too large, the target tab has no
    /// content script, or this context is detached.
    async fn send_message(
        &self,
        destination: Destination,
        message: Value,
    ) -> TransportResult<Option<Value>>;

    /// Primitive B: open a named port to the background context.
    ///
    /// # Errors
    ///
    /// Returns an error if this context is detached.
    async fn connect(&self, name: &str) -> TransportResult<Port>;

    /// Tabs that currently host at least one content script.
    async fn tabs(&self) -> Vec<TabId>;

    /// Install the message listener, replacing any previous one.
    async fn set_message_listener(&self, listener: Arc<dyn MessageListener>);

    /// Install the connect listener, replacing any previous one.
    async fn set_connect_listener(&self, listener: Arc<dyn ConnectListener>);

    /// Remove this context from the runtime, disconnecting its ports.
    async fn detach(&self);
}
