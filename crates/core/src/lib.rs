//! Shared vocabulary for the tabrelay crates.
//!
//! - **Contexts**: [`ContextKind`], [`SenderInfo`] and the coarse
//!   [`SenderCategory`] origin filter
//! - **Envelope roles**: [`Role`]
//! - **Identifiers**: [`CorrelationId`], [`HandlerId`], [`TabId`]
//! - **Configuration**: [`RelayConfig`]

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod ids;
pub mod result;

pub use config::RelayConfig;
pub use context::{
    ContextId, ContextKind, Role, SenderCategory, SenderInfo, Surface, TabId, is_extension_origin,
};
pub use error::Error;
pub use event::EventName;
pub use ids::{CorrelationId, HandlerId};
pub use result::{Result, ResultExt};
