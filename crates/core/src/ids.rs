//! Identifiers for in-flight requests and handler registrations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque identifier binding a request to its eventual response.
///
/// Generated by the dispatcher and stable for the whole lifecycle of one
/// logical call. Prefer a random UUID; when the OS entropy source is
/// unavailable the generator falls back to a timestamp-prefixed composite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new unique correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(generate())
    }

    /// Create a correlation ID from an existing string.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the correlation ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn generate() -> String {
    let mut bytes = [0u8; 16];
    match getrandom::fill(&mut bytes) {
        Ok(()) => uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string(),
        Err(err) => {
            tracing::debug!(error = %err, "OS entropy unavailable, using timestamp id");
            fallback_id()
        }
    }
}

static FALLBACK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Timestamp prefix plus a mixed suffix.
///
/// Ordering is only approximately chronological; uniqueness within a process
/// comes from the sequence counter folded into the suffix.
pub(crate) fn fallback_id() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let millis = since_epoch.as_millis();
    let sequence = FALLBACK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let suffix = splitmix64(u64::from(since_epoch.subsec_nanos()) ^ sequence.rotate_left(32));
    format!("{millis:x}-{suffix:016x}")
}

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Numbered identity of one handler registration.
///
/// Lets a cancellation remove exactly the registration it created, even if
/// the same event name was registered again afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    /// Allocate the next handler ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}
