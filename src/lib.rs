#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Tabrelay
//!
//! Typed request/response and broadcast relay between the isolated execution
//! contexts of a browser extension.
//!
//! This library re-exports the workspace crates and adds the end-to-end
//! [`scenarios`] the CLI runs on a simulated extension.

pub use tabrelay_core;
pub use tabrelay_ipc;
pub use tabrelay_messaging;

pub mod scenarios;
