//! Tabrelay IPC - wire protocol and runtime seam for extension contexts
//!
//! This crate defines everything that crosses a context boundary and the two
//! primitives the host runtime provides for moving it.
//!
//! # Protocol
//!
//! One-shot traffic is a tagged [`Envelope`]:
//!
//! ```text
//! Client ──request──▶ Relay ──request──▶ Handler(s)
//! Client ◀──ack────── Relay
//! Client ◀─response── Relay ◀─response── Handler
//! ```
//!
//! Broadcast traffic runs over named [`Port`]s carrying [`PortMessage`]s.
//!
//! # Constraints
//!
//! - Every payload is JSON; nothing else crosses a boundary
//! - Payloads above the runtime budget are rejected before delivery
//! - A response payload never carries both data and error
//!
//! # Example
//!
//! ```rust
//! use tabrelay_ipc::{Envelope, ResponsePayload};
//! use tabrelay_core::{CorrelationId, EventName, Role};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let env = Envelope::response(
//!     CorrelationId::new(),
//!     EventName::new("greeting")?,
//!     Role::Handler,
//!     Role::Relay,
//!     ResponsePayload::Success(serde_json::json!("Hello, World!")),
//! );
//! let value = env.to_value()?;
//! assert_eq!(Envelope::parse(&value)?, env);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod error;
mod messages;
mod port;
mod runtime;
mod transport;

pub use error::{TransportError, TransportResult};
pub use messages::{
    Accepted, BroadcastReply, Envelope, MessageKind, NO_HANDLER_CODE, PortMessage, RemoteError,
    ResponsePayload,
};
pub use port::{Port, PortId, PortReceiver, PortSender, encoded_len};
pub use runtime::{ContextEndpoint, InMemoryRuntime};
pub use transport::{ConnectListener, Destination, MessageListener, RuntimeTransport};
