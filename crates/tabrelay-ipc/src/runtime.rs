//! In-process stand-in for the browser extension runtime.
//!
//! Each attached context gets a [`ContextEndpoint`] that implements
//! [`RuntimeTransport`]. Contexts share nothing but JSON values: every
//! delivered message is cloned per recipient, and every listener invocation
//! runs in its own task, so recipients behave like independent event loops.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use tabrelay_core::config::DEFAULT_MAX_MESSAGE_BYTES;
use tabrelay_core::{ContextId, ContextKind, SenderInfo, TabId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::port::encoded_len;
use crate::transport::{ConnectListener, Destination, MessageListener, RuntimeTransport};
use crate::{Port, PortSender, TransportError, TransportResult};

struct Slot {
    kind: ContextKind,
    message_listener: Option<Arc<dyn MessageListener>>,
    connect_listener: Option<Arc<dyn ConnectListener>>,
    ports: Vec<PortSender>,
}

impl Slot {
    fn track(&mut self, port: PortSender) {
        self.ports.retain(PortSender::is_connected);
        self.ports.push(port);
    }

    fn teardown(self) {
        self.ports.iter().for_each(PortSender::disconnect);
    }
}

struct RuntimeInner {
    extension_id: String,
    max_message_bytes: usize,
    next_context: AtomicU64,
    slots: RwLock<HashMap<ContextId, Slot>>,
}

/// Simulated browser runtime shared by every context of one extension.
#[derive(Clone)]
pub struct InMemoryRuntime {
    inner: Arc<RuntimeInner>,
}

impl InMemoryRuntime {
    /// Create a runtime with the default message budget.
    #[must_use]
    pub fn new(extension_id: impl Into<String>) -> Self {
        Self::with_max_message_bytes(extension_id, DEFAULT_MAX_MESSAGE_BYTES)
    }

    /// Create a runtime that rejects payloads above `max_message_bytes`.
    #[must_use]
    pub fn with_max_message_bytes(extension_id: impl Into<String>, max_message_bytes: usize) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                extension_id: extension_id.into(),
                max_message_bytes,
                next_context: AtomicU64::new(1),
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Origin shared by the background and every extension page.
    #[must_use]
    pub fn extension_origin(&self) -> String {
        format!("chrome-extension://{}/", self.inner.extension_id)
    }

    /// Attach a context with the URL its kind would normally have.
    pub async fn attach(&self, kind: ContextKind) -> ContextEndpoint {
        let url = match kind {
            ContextKind::Background => format!("{}background.js", self.extension_origin()),
            ContextKind::ExtensionPage { surface } => {
                format!("{}{}", self.extension_origin(), surface.document())
            }
            ContextKind::ContentScript { tab_id } => format!("https://tab-{tab_id}.example/"),
        };
        self.attach_with_url(kind, Some(url)).await
    }

    /// Attach a context with an explicit document URL.
    pub async fn attach_with_url(&self, kind: ContextKind, url: Option<String>) -> ContextEndpoint {
        let context_id = ContextId::new(self.inner.next_context.fetch_add(1, Ordering::Relaxed));
        let info = SenderInfo {
            context_id,
            tab_id: kind.tab_id(),
            url,
        };

        self.inner.slots.write().await.insert(
            context_id,
            Slot {
                kind,
                message_listener: None,
                connect_listener: None,
                ports: Vec::new(),
            },
        );
        debug!(context_id = %context_id, kind = %kind, "context attached");

        ContextEndpoint {
            runtime: Arc::clone(&self.inner),
            kind,
            info,
        }
    }

    /// Tear down every context of a tab, as closing or navigating it would.
    ///
    /// Returns the number of contexts removed.
    pub async fn close_tab(&self, tab_id: TabId) -> usize {
        let removed: Vec<Slot> = {
            let mut slots = self.inner.slots.write().await;
            let ids: Vec<ContextId> = slots
                .iter()
                .filter(|(_, slot)| slot.kind.tab_id() == Some(tab_id))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| slots.remove(id)).collect()
        };
        debug!(tab_id = %tab_id, contexts = removed.len(), "tab closed");
        let count = removed.len();
        removed.into_iter().for_each(Slot::teardown);
        count
    }

    /// Tabs that host at least one content script.
    pub async fn open_tabs(&self) -> Vec<TabId> {
        self.inner.open_tabs().await
    }

    /// Number of attached contexts.
    pub async fn context_count(&self) -> usize {
        self.inner.slots.read().await.len()
    }
}

impl std::fmt::Debug for InMemoryRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRuntime")
            .field("extension_id", &self.inner.extension_id)
            .field("max_message_bytes", &self.inner.max_message_bytes)
            .finish_non_exhaustive()
    }
}

impl RuntimeInner {
    async fn open_tabs(&self) -> Vec<TabId> {
        let tabs: BTreeSet<TabId> = self
            .slots
            .read()
            .await
            .values()
            .filter_map(|slot| slot.kind.tab_id())
            .collect();
        tabs.into_iter().collect()
    }

    fn check_size(&self, value: &Value) -> TransportResult<()> {
        let size = encoded_len(value)?;
        if size > self.max_message_bytes {
            return Err(TransportError::message_too_large(size, self.max_message_bytes));
        }
        Ok(())
    }
}

/// One context's handle on the runtime.
pub struct ContextEndpoint {
    runtime: Arc<RuntimeInner>,
    kind: ContextKind,
    info: SenderInfo,
}

impl ContextEndpoint {
    /// Metadata recipients see for messages from this context.
    #[must_use]
    pub fn sender_info(&self) -> &SenderInfo {
        &self.info
    }

    /// Check whether this context is still attached.
    pub async fn is_attached(&self) -> bool {
        self.runtime.slots.read().await.contains_key(&self.info.context_id)
    }

    async fn recipients(
        &self,
        destination: Destination,
    ) -> TransportResult<Vec<Arc<dyn MessageListener>>> {
        let slots = self.runtime.slots.read().await;
        if !slots.contains_key(&self.info.context_id) {
            return Err(TransportError::context_detached(self.info.context_id));
        }

        let own_id = self.info.context_id;
        let listeners: Vec<Arc<dyn MessageListener>> = slots
            .iter()
            .filter(|(id, _)| **id != own_id)
            .filter(|(_, slot)| match destination {
                Destination::Extension => !matches!(slot.kind, ContextKind::ContentScript { .. }),
                Destination::Tab(tab_id) => slot.kind.tab_id() == Some(tab_id),
            })
            .filter_map(|(_, slot)| slot.message_listener.clone())
            .collect();

        match destination {
            Destination::Tab(tab_id) if listeners.is_empty() => {
                Err(TransportError::no_such_tab(tab_id))
            }
            _ => Ok(listeners),
        }
    }
}

#[async_trait]
impl RuntimeTransport for ContextEndpoint {
    fn context_id(&self) -> ContextId {
        self.info.context_id
    }

    fn kind(&self) -> ContextKind {
        self.kind
    }

    fn max_message_bytes(&self) -> usize {
        self.runtime.max_message_bytes
    }

    async fn send_message(
        &self,
        destination: Destination,
        message: Value,
    ) -> TransportResult<Option<Value>> {
        self.runtime.check_size(&message)?;
        let listeners = self.recipients(destination).await?;

        let mut replies: FuturesUnordered<_> = listeners
            .into_iter()
            .map(|listener| {
                let message = message.clone();
                let sender = self.info.clone();
                tokio::spawn(async move { listener.on_message(message, sender).await })
            })
            .collect();

        // First reply wins; the remaining listener tasks keep running detached.
        while let Some(joined) = replies.next().await {
            match joined {
                Ok(Some(reply)) => return Ok(Some(reply)),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "message listener task failed"),
            }
        }
        Ok(None)
    }

    async fn connect(&self, name: &str) -> TransportResult<Port> {
        let (connector, acceptor) =
            Port::pair(name, self.info.clone(), self.runtime.max_message_bytes);

        let listener = {
            let mut slots = self.runtime.slots.write().await;
            let own = slots
                .get_mut(&self.info.context_id)
                .ok_or_else(|| TransportError::context_detached(self.info.context_id))?;
            own.track(connector.sender_handle());

            slots
                .values_mut()
                .find(|slot| slot.kind.is_background())
                .and_then(|background| {
                    background.track(acceptor.sender_handle());
                    background.connect_listener.clone()
                })
        };

        match listener {
            Some(listener) => {
                tokio::spawn(async move { listener.on_connect(acceptor).await });
            }
            None => {
                debug!(name = %name, "no background connect listener; port closed");
                acceptor.disconnect();
            }
        }
        Ok(connector)
    }

    async fn tabs(&self) -> Vec<TabId> {
        self.runtime.open_tabs().await
    }

    async fn set_message_listener(&self, listener: Arc<dyn MessageListener>) {
        if let Some(slot) = self.runtime.slots.write().await.get_mut(&self.info.context_id) {
            slot.message_listener = Some(listener);
        }
    }

    async fn set_connect_listener(&self, listener: Arc<dyn ConnectListener>) {
        if let Some(slot) = self.runtime.slots.write().await.get_mut(&self.info.context_id) {
            slot.connect_listener = Some(listener);
        }
    }

    async fn detach(&self) {
        let removed = self.runtime.slots.write().await.remove(&self.info.context_id);
        if let Some(slot) = removed {
            debug!(context_id = %self.info.context_id, "context detached");
            slot.teardown();
        }
    }
}

impl std::fmt::Debug for ContextEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEndpoint")
            .field("kind", &self.kind)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
