//! Long-lived bidirectional ports (transport primitive B).
//!
//! A port is one end of a named connection. Both ends may post any number of
//! JSON values until either side disconnects; disconnect is observed by both
//! ends as the receiver yielding `None`.
//!
//! # Thread Safety
//! - [`PortSender`] is `Clone + Send + Sync`, so a coordinator can keep a
//!   handle in a group while a task owns the [`PortReceiver`]
//! - [`PortReceiver`] is single-consumer

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tabrelay_core::SenderInfo;
use tokio::sync::mpsc;

use crate::{TransportError, TransportResult};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one port connection, shared by both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u64);

impl PortId {
    fn next() -> Self {
        Self(NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

enum Frame {
    Message(Value),
    Disconnect,
}

/// Sending half of a port.
#[derive(Clone)]
pub struct PortSender {
    id: PortId,
    name: Arc<str>,
    sender: Option<SenderInfo>,
    peer: mpsc::UnboundedSender<Frame>,
    own: mpsc::UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
    max_message_bytes: usize,
}

impl PortSender {
    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Name the connection was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metadata of the connecting context, present on the accepting end.
    #[must_use]
    pub fn sender(&self) -> Option<&SenderInfo> {
        self.sender.as_ref()
    }

    /// Check whether neither side has disconnected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Post a message to the other end.
    ///
    /// # Postconditions
    /// - Returns Err(TransportError::PortDisconnected) once either side disconnected
    /// - Returns Err(TransportError::MessageTooLarge) if the JSON form exceeds the budget
    /// - Messages arrive at the peer in posting order
    ///
    /// # Errors
    ///
    /// See postconditions.
    pub fn post<T: Serialize + ?Sized>(&self, message: &T) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::port_disconnected(self.name.as_ref()));
        }

        let value = serde_json::to_value(message)
            .map_err(|e| TransportError::serialization_failed(e.to_string()))?;
        let size = encoded_len(&value)?;
        if size > self.max_message_bytes {
            return Err(TransportError::message_too_large(
                size,
                self.max_message_bytes,
            ));
        }

        self.peer
            .send(Frame::Message(value))
            .map_err(|_| TransportError::port_disconnected(self.name.as_ref()))
    }

    /// Disconnect the port. Both ends observe the disconnect; repeated calls
    /// are no-ops.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(port = %self.id, name = %self.name, "port disconnected");
        // Either receiver may already be gone.
        let _ = self.peer.send(Frame::Disconnect);
        let _ = self.own.send(Frame::Disconnect);
    }
}

impl std::fmt::Debug for PortSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSender")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Receiving half of a port.
pub struct PortReceiver {
    id: PortId,
    inbox: mpsc::UnboundedReceiver<Frame>,
    done: bool,
}

impl PortReceiver {
    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the port is disconnected from either side. Messages
    /// posted before the disconnect are still delivered first.
    pub async fn recv(&mut self) -> Option<Value> {
        if self.done {
            return None;
        }
        match self.inbox.recv().await {
            Some(Frame::Message(value)) => Some(value),
            Some(Frame::Disconnect) | None => {
                self.done = true;
                None
            }
        }
    }
}

impl std::fmt::Debug for PortReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortReceiver")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}

/// One end of a named connection.
#[derive(Debug)]
pub struct Port {
    sender: PortSender,
    receiver: PortReceiver,
}

impl Port {
    /// Create both ends of a connection.
    ///
    /// The first end belongs to the connecting context, the second to the
    /// accepting one. Only the accepting end carries `connector` metadata.
    #[must_use]
    pub fn pair(name: &str, connector: SenderInfo, max_message_bytes: usize) -> (Self, Self) {
        let id = PortId::next();
        let name: Arc<str> = Arc::from(name);
        let closed = Arc::new(AtomicBool::new(false));
        let (connector_tx, connector_rx) = mpsc::unbounded_channel();
        let (acceptor_tx, acceptor_rx) = mpsc::unbounded_channel();

        let connector_end = Self {
            sender: PortSender {
                id,
                name: Arc::clone(&name),
                sender: None,
                peer: acceptor_tx.clone(),
                own: connector_tx.clone(),
                closed: Arc::clone(&closed),
                max_message_bytes,
            },
            receiver: PortReceiver {
                id,
                inbox: connector_rx,
                done: false,
            },
        };

        let acceptor_end = Self {
            sender: PortSender {
                id,
                name,
                sender: Some(connector),
                peer: connector_tx,
                own: acceptor_tx,
                closed,
                max_message_bytes,
            },
            receiver: PortReceiver {
                id,
                inbox: acceptor_rx,
                done: false,
            },
        };

        (connector_end, acceptor_end)
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> PortId {
        self.sender.id
    }

    /// Name the connection was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        self.sender.name()
    }

    /// Metadata of the connecting context, present on the accepting end.
    #[must_use]
    pub fn sender(&self) -> Option<&SenderInfo> {
        self.sender.sender()
    }

    /// A clonable handle for posting and disconnecting.
    #[must_use]
    pub fn sender_handle(&self) -> PortSender {
        self.sender.clone()
    }

    /// Post a message to the other end.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is disconnected or the message is too large.
    pub fn post<T: Serialize + ?Sized>(&self, message: &T) -> TransportResult<()> {
        self.sender.post(message)
    }

    /// Wait for the next message; `None` after disconnect.
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Disconnect both ends.
    pub fn disconnect(&self) {
        self.sender.disconnect();
    }

    /// Split into independently owned halves.
    #[must_use]
    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}

/// Length of the JSON encoding of a value.
///
/// # Errors
///
/// Returns an error if the value cannot be encoded.
pub fn encoded_len(value: &Value) -> TransportResult<usize> {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .map_err(|e| TransportError::serialization_failed(e.to_string()))
}
