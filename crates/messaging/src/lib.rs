//! Tabrelay messaging - cross-context relay for browser extensions
//!
//! Every execution context of an extension (the background worker, each tab's
//! content script, each extension page) starts one [`RelayContext`]. Code in
//! any context can then call handlers registered in any other context as if
//! they were local async functions.
//!
//! # Routes
//!
//! | Route       | Register                             | Call                             | Replies        |
//! |-------------|--------------------------------------|----------------------------------|----------------|
//! | coordinated | [`RelayContext::handle`]             | [`RelayContext::invoke`]         | one            |
//! | direct      | [`RelayContext::handle_direct`]      | [`RelayContext::dispatch_direct`]| one            |
//! | broadcast   | [`RelayContext::handle_broadcast`]   | [`RelayContext::broadcast`]      | one per tab    |
//!
//! Coordinated calls go through the [`Coordinator`] in the background, which
//! acknowledges each request before routing it. A missing acknowledgment is an
//! [`ErrorKind::AckTimeout`]; a missing response after the acknowledgment is an
//! [`ErrorKind::ResponseTimeout`].
//!
//! # Example
//!
//! ```rust
//! use std::convert::Infallible;
//! use tabrelay_core::{ContextKind, EventName, RelayConfig, Surface};
//! use tabrelay_ipc::InMemoryRuntime;
//! use tabrelay_messaging::{RelayContext, handler_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = InMemoryRuntime::new("demo");
//! let background = RelayContext::start(
//!     runtime.attach(ContextKind::Background).await,
//!     RelayConfig::default(),
//! )
//! .await?;
//! let popup = RelayContext::start(
//!     runtime.attach(ContextKind::ExtensionPage { surface: Surface::Popup }).await,
//!     RelayConfig::default(),
//! )
//! .await?;
//!
//! let greeting = EventName::new("greeting")?;
//! background
//!     .handle(
//!         greeting.clone(),
//!         handler_fn(|name: String| async move { Ok::<_, Infallible>(format!("Hello, {name}!")) }),
//!     )
//!     .await?;
//!
//! let reply = popup.invoke(&greeting, serde_json::json!("World")).await?;
//! assert_eq!(reply, serde_json::json!("Hello, World!"));
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod broadcast;
mod context;
mod coordinator;
mod direct;
mod error;
mod handler;
mod hub;
mod pending;
mod registry;
mod typed;

pub use broadcast::port_name;
pub use context::{HandlerGuard, RelayContext};
pub use coordinator::{Coordinator, Origin};
pub use direct::ChannelPattern;
pub use error::{ErrorKind, RelayError, Result};
pub use handler::{Handler, HandlerFuture, handler_fn, handler_sync, invoke};
pub use hub::PortHub;
pub use pending::{PendingHandle, PendingRequest, PendingTable, outcome};
pub use registry::HandlerRegistry;
pub use typed::{BroadcastEvent, DirectChannel, RelayEvent, TypedReply};
