//! Per-context handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use tabrelay_core::{EventName, HandlerId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::handler::Handler;

struct Registration {
    id: HandlerId,
    handler: Arc<dyn Handler>,
}

/// Maps event names to the single active handler of this context.
///
/// A second registration for the same event is rejected; the first must be
/// cancelled before another can take its place.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<HashMap<EventName, Registration>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateHandler` if the event already has a handler.
    pub async fn register(&self, event: EventName, handler: Arc<dyn Handler>) -> Result<HandlerId> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&event) {
            return Err(RelayError::duplicate_handler(&event));
        }
        let id = HandlerId::next();
        debug!(event = %event, handler_id = %id, "handler registered");
        entries.insert(event, Registration { id, handler });
        Ok(id)
    }

    /// Remove the registration, but only if it is still the one `id` names.
    ///
    /// Returns whether anything was removed. Calls already holding the
    /// handler run to completion.
    pub async fn unregister(&self, event: &EventName, id: HandlerId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(event) {
            Some(registration) if registration.id == id => {
                entries.remove(event);
                debug!(event = %event, handler_id = %id, "handler unregistered");
                true
            }
            _ => false,
        }
    }

    /// Look up the handler for an event.
    pub async fn get(&self, event: &EventName) -> Option<Arc<dyn Handler>> {
        self.entries
            .read()
            .await
            .get(event)
            .map(|registration| Arc::clone(&registration.handler))
    }

    /// Check whether an event has a handler.
    pub async fn contains(&self, event: &EventName) -> bool {
        self.entries.read().await.contains_key(event)
    }

    /// Number of registered events.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check whether no handler is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove every registration.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::error::ErrorKind;
    use crate::handler::handler_sync;
    use serde_json::Value;

    fn event(name: &str) -> EventName {
        EventName::new(name).expect("valid event name")
    }

    fn echo() -> Arc<dyn Handler> {
        handler_sync(|v: Value| Ok::<_, String>(v))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = HandlerRegistry::new();
        registry.register(event("greeting"), echo()).await.unwrap();
        assert!(registry.get(&event("greeting")).await.is_some());
        assert!(registry.get(&event("other")).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = HandlerRegistry::new();
        registry.register(event("greeting"), echo()).await.unwrap();
        let err = registry
            .register(event("greeting"), echo())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateHandler);
    }

    #[tokio::test]
    async fn test_prefixes_are_distinct_events() {
        let registry = HandlerRegistry::new();
        registry.register(event("cs2bg:ping"), echo()).await.unwrap();
        registry.register(event("ep2cs:ping"), echo()).await.unwrap();
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_stale_unregister_is_noop() {
        let registry = HandlerRegistry::new();
        let first = registry.register(event("greeting"), echo()).await.unwrap();
        assert!(registry.unregister(&event("greeting"), first).await);
        assert!(!registry.unregister(&event("greeting"), first).await);

        let second = registry.register(event("greeting"), echo()).await.unwrap();
        assert!(!registry.unregister(&event("greeting"), first).await);
        assert!(registry.contains(&event("greeting")).await);
        assert!(registry.unregister(&event("greeting"), second).await);
        assert!(registry.is_empty().await);
    }
}
