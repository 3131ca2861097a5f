//! Execution contexts, participant roles and sender metadata.
//!
//! A context kind is decided once by the hosting application and injected
//! into the relay instance at construction. Nothing in the relay inspects the
//! environment to guess where it runs.

use serde::{Deserialize, Serialize};

/// URL schemes that identify an extension-page origin.
pub const EXTENSION_SCHEMES: [&str; 2] = ["chrome-extension://", "moz-extension://"];

/// Browser tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(u32);

impl TabId {
    /// Wrap a raw tab id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime-assigned identity of one attached context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(u64);

impl ContextId {
    /// Wrap a raw context id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Extension UI surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Popup,
    Options,
    SidePanel,
    Offscreen,
    Devtools,
}

impl Surface {
    /// Document name the surface is served from.
    #[must_use]
    pub const fn document(self) -> &'static str {
        match self {
            Self::Popup => "popup.html",
            Self::Options => "options.html",
            Self::SidePanel => "sidepanel.html",
            Self::Offscreen => "offscreen.html",
            Self::Devtools => "devtools.html",
        }
    }
}

/// Which isolated execution environment a relay instance lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextKind {
    /// The privileged background service worker. Hosts the coordinator.
    Background,
    /// A content script injected into one tab.
    ContentScript { tab_id: TabId },
    /// An extension UI page.
    ExtensionPage { surface: Surface },
}

impl ContextKind {
    /// Check if this is the background context.
    #[must_use]
    pub const fn is_background(&self) -> bool {
        matches!(self, Self::Background)
    }

    /// Tab this context is scoped to, if any.
    #[must_use]
    pub const fn tab_id(&self) -> Option<TabId> {
        match self {
            Self::ContentScript { tab_id } => Some(*tab_id),
            Self::Background | Self::ExtensionPage { .. } => None,
        }
    }

    /// How peers will classify messages sent from this context.
    #[must_use]
    pub const fn category(&self) -> SenderCategory {
        match self {
            Self::ContentScript { .. } => SenderCategory::ContentScript,
            Self::Background | Self::ExtensionPage { .. } => SenderCategory::Extension,
        }
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::ContentScript { tab_id } => write!(f, "content-script(tab {tab_id})"),
            Self::ExtensionPage { surface } => write!(f, "page({})", surface.document()),
        }
    }
}

/// Participant role declared on every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller that dispatched the request.
    Client,
    /// The background coordinator.
    Relay,
    /// The callee that runs a registered callback.
    Handler,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Relay => write!(f, "relay"),
            Self::Handler => write!(f, "handler"),
        }
    }
}

/// Coarse origin classification of a message or port sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderCategory {
    /// Sender carries a tab id.
    ContentScript,
    /// Sender has an extension-page origin (background or UI surface).
    Extension,
    /// Neither; requests from such senders are never served.
    Unknown,
}

/// Metadata the runtime attaches to every delivered message and port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    /// Runtime identity of the sending context.
    pub context_id: ContextId,
    /// Tab of the sender, present only for content scripts.
    pub tab_id: Option<TabId>,
    /// Document URL of the sender.
    pub url: Option<String>,
}

impl SenderInfo {
    /// Classify the sender by tab presence first, then by URL origin.
    #[must_use]
    pub fn category(&self) -> SenderCategory {
        if self.tab_id.is_some() {
            return SenderCategory::ContentScript;
        }
        match &self.url {
            Some(url) if is_extension_origin(url) => SenderCategory::Extension,
            _ => SenderCategory::Unknown,
        }
    }
}

/// Check whether a URL belongs to an extension origin.
#[must_use]
pub fn is_extension_origin(url: &str) -> bool {
    EXTENSION_SCHEMES
        .iter()
        .any(|scheme| url.starts_with(scheme))
}
