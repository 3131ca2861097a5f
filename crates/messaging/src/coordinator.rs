//! Central relay coordinator, resident in the background context.
//!
//! Per logical call:
//!
//! ```text
//! request received ──▶ acknowledge origin ──▶ record in flight ──▶ fan out
//!                                                   │
//!            response received ◀────────────────────┘
//!                   │
//!                   ├─ entry present: remove, forward to origin
//!                   └─ entry absent:  late or duplicate, drop
//! ```
//!
//! The coordinator also owns the [`PortHub`] that aggregates broadcasts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tabrelay_core::{CorrelationId, EventName, ResultExt, Role, SenderInfo, TabId};
use tabrelay_ipc::{
    Accepted, Destination, Envelope, RemoteError, ResponsePayload, RuntimeTransport,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::handler::invoke;
use crate::hub::PortHub;
use crate::pending::{PendingTable, outcome};
use crate::registry::HandlerRegistry;

/// Where a request came from, and so where its acknowledgment and response go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The background context itself.
    Local,
    /// A content script in this tab.
    Tab(TabId),
    /// An extension page; replies go out extension-wide.
    Extension,
}

impl Origin {
    /// Origin of a message delivered by the runtime.
    pub fn of(sender: &SenderInfo) -> Self {
        sender.tab_id.map_or(Self::Extension, Self::Tab)
    }

    fn destination(self) -> Option<Destination> {
        match self {
            Self::Local => None,
            Self::Tab(tab_id) => Some(Destination::Tab(tab_id)),
            Self::Extension => Some(Destination::Extension),
        }
    }
}

struct InFlight {
    event: EventName,
    origin: Origin,
    created_at: DateTime<Utc>,
}

/// Routes every coordinated request to handlers and every response back to
/// its caller.
pub struct Coordinator {
    transport: Arc<dyn RuntimeTransport>,
    handlers: Arc<HandlerRegistry>,
    pending: Arc<PendingTable>,
    expiry: Duration,
    in_flight: Arc<Mutex<HashMap<CorrelationId, InFlight>>>,
    hub: Arc<PortHub>,
}

impl Coordinator {
    /// Create a coordinator over the background context's own tables.
    ///
    /// `expiry` bounds how long an unanswered request is remembered.
    pub(crate) fn new(
        transport: Arc<dyn RuntimeTransport>,
        handlers: Arc<HandlerRegistry>,
        pending: Arc<PendingTable>,
        expiry: Duration,
        hub: Arc<PortHub>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            handlers,
            pending,
            expiry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            hub,
        })
    }

    pub(crate) fn hub(&self) -> &Arc<PortHub> {
        &self.hub
    }

    /// Requests relayed but not yet answered.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Live handler ports for a broadcast event.
    pub async fn port_group_size(&self, event: &EventName) -> usize {
        self.hub.group_size(event).await
    }

    /// Broadcasts still collecting replies.
    pub async fn pending_aggregations(&self) -> usize {
        self.hub.pending().await
    }

    /// Handle a request addressed to the relay.
    pub(crate) async fn on_request(self: Arc<Self>, envelope: Envelope, origin: Origin) {
        let kind = envelope.kind();
        let Envelope::Request { id, event, args, .. } = envelope else {
            debug!(kind = %kind, "coordinator ignored non-request");
            return;
        };

        self.acknowledge(&id, &event, origin).await;

        let created_at = Utc::now();
        self.in_flight.lock().await.insert(
            id.clone(),
            InFlight {
                event: event.clone(),
                origin,
                created_at,
            },
        );
        self.spawn_expiry(id.clone());
        debug!(event = %event, correlation_id = %id, origin = ?origin, "request relayed");

        let accepted = self.fan_out(&id, &event, args).await;
        if accepted == 0 {
            debug!(event = %event, correlation_id = %id, "no context accepted request");
            let payload = ResponsePayload::Failure(RemoteError::no_handler(&event));
            self.on_response(Envelope::response(id, event, Role::Handler, Role::Relay, payload))
                .await;
        }
    }

    /// Handle a response addressed to the relay.
    ///
    /// The in-flight entry is removed exactly once; any later response for the
    /// same ID is dropped.
    pub(crate) async fn on_response(&self, envelope: Envelope) {
        let kind = envelope.kind();
        let Envelope::Response {
            id,
            event,
            response,
            ..
        } = envelope
        else {
            debug!(kind = %kind, "coordinator ignored non-response");
            return;
        };

        let entry = self.in_flight.lock().await.remove(&id);
        let Some(entry) = entry else {
            debug!(event = %event, correlation_id = %id, "late or duplicate response dropped");
            return;
        };

        let elapsed_ms = (Utc::now() - entry.created_at).num_milliseconds();
        debug!(event = %entry.event, correlation_id = %id, elapsed_ms, "response routed");

        match entry.origin.destination() {
            None => {
                self.pending.settle(&id, outcome(&event, response)).await;
            }
            Some(destination) => {
                let forward = Envelope::response(id, event, Role::Relay, Role::Client, response);
                self.send(destination, &forward).await;
            }
        }
    }

    async fn acknowledge(&self, id: &CorrelationId, event: &EventName, origin: Origin) {
        match origin.destination() {
            None => {
                self.pending.acknowledge(id).await;
            }
            Some(destination) => {
                let ack = Envelope::acknowledgment(id.clone(), event.clone());
                self.send(destination, &ack).await;
            }
        }
    }

    /// Deliver the request to every candidate handler. Returns how many
    /// accepted it.
    async fn fan_out(self: &Arc<Self>, id: &CorrelationId, event: &EventName, args: Value) -> usize {
        let local = match self.handlers.get(event).await {
            Some(handler) => {
                let coordinator = Arc::clone(self);
                let (id, event, args) = (id.clone(), event.clone(), args.clone());
                tokio::spawn(async move {
                    let payload = invoke(&event, &handler, args).await;
                    coordinator
                        .on_response(Envelope::response(id, event, Role::Handler, Role::Relay, payload))
                        .await;
                });
                1
            }
            None => 0,
        };

        let request = Envelope::request(id.clone(), event.clone(), Role::Relay, Role::Handler, args);
        let Some(value) = request.to_value().ok_logged("encode relayed request") else {
            return local;
        };

        let mut destinations = vec![Destination::Extension];
        destinations.extend(self.transport.tabs().await.into_iter().map(Destination::Tab));

        let replies = join_all(destinations.into_iter().map(|destination| {
            let value = value.clone();
            async move { self.transport.send_message(destination, value).await }
        }))
        .await;

        let remote = replies
            .into_iter()
            .filter_map(|reply| reply.ok_quiet("relay request to handlers").flatten())
            .filter(Accepted::is_accepted)
            .count();

        local + remote
    }

    async fn send(&self, destination: Destination, envelope: &Envelope) {
        let Some(value) = envelope.to_value().ok_logged("encode envelope") else {
            return;
        };
        if let Err(e) = self.transport.send_message(destination, value).await {
            warn!(
                destination = %destination,
                correlation_id = %envelope.id(),
                kind = %envelope.kind(),
                error = %e,
                "delivery to caller failed"
            );
        }
    }

    fn spawn_expiry(&self, id: CorrelationId) {
        let in_flight = Arc::clone(&self.in_flight);
        let expiry = self.expiry;
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            let expired = in_flight.lock().await.remove(&id);
            if let Some(entry) = expired {
                debug!(event = %entry.event, correlation_id = %id, "unanswered request expired");
            }
        });
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("context_id", &self.transport.context_id())
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabrelay_core::ContextId;

    #[test]
    fn test_origin_from_sender() {
        let tab = SenderInfo {
            context_id: ContextId::new(1),
            tab_id: Some(TabId::new(4)),
            url: None,
        };
        assert_eq!(Origin::of(&tab), Origin::Tab(TabId::new(4)));

        let page = SenderInfo {
            context_id: ContextId::new(2),
            tab_id: None,
            url: Some("chrome-extension://abc/popup.html".to_string()),
        };
        assert_eq!(Origin::of(&page), Origin::Extension);
        assert_eq!(Origin::Local.destination(), None);
        assert_eq!(
            Origin::Tab(TabId::new(4)).destination(),
            Some(Destination::Tab(TabId::new(4)))
        );
    }
}
