//! Port hub: the background side of one-to-many broadcasts.
//!
//! Handler contexts keep one port per event open to the hub; the hub keeps
//! them in per-event groups. A broadcast snapshots the group, relays the
//! request to every port in the snapshot and answers the caller once every
//! snapshot member replied.
//!
//! Ports are classified by the connecting context's metadata, never by the
//! port name: content scripts are handlers, extension pages are callers and
//! anything else is refused.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tabrelay_core::{CorrelationId, EventName, ResultExt, SenderCategory, SenderInfo};
use tabrelay_ipc::{BroadcastReply, ConnectListener, Port, PortId, PortMessage, PortSender};
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

/// Where the aggregated replies of one broadcast go.
pub(crate) enum Sink {
    /// A caller's port.
    Port(PortSender),
    /// A caller inside the background context itself.
    Local(oneshot::Sender<Vec<BroadcastReply>>),
}

impl Sink {
    fn deliver(self, msg_id: CorrelationId, results: Vec<BroadcastReply>) {
        match self {
            Self::Port(port) => {
                port.post(&PortMessage::Responses { msg_id, results })
                    .ok_quiet("deliver broadcast results");
            }
            Self::Local(tx) => {
                let _ = tx.send(results);
            }
        }
    }

    fn is_port(&self, id: PortId) -> bool {
        matches!(self, Self::Port(port) if port.id() == id)
    }
}

struct Aggregation {
    event: EventName,
    expected: usize,
    responders: HashSet<PortId>,
    results: Vec<BroadcastReply>,
    sink: Sink,
}

impl Aggregation {
    fn is_complete(&self) -> bool {
        self.results.len() >= self.expected
    }
}

type Aggregations = Arc<Mutex<HashMap<CorrelationId, Aggregation>>>;

/// Broadcast coordinator state, resident in the background context.
pub struct PortHub {
    prefix: String,
    timeout: Duration,
    groups: Mutex<HashMap<EventName, Vec<PortSender>>>,
    aggregations: Aggregations,
}

impl PortHub {
    /// Create a hub for ports named `prefix` + event.
    pub fn new(prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            timeout,
            groups: Mutex::new(HashMap::new()),
            aggregations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live handler ports for an event.
    pub async fn group_size(&self, event: &EventName) -> usize {
        self.groups.lock().await.get(event).map_or(0, Vec::len)
    }

    /// Number of events with at least one handler port.
    pub async fn group_count(&self) -> usize {
        self.groups.lock().await.len()
    }

    /// Number of broadcasts still collecting replies.
    pub async fn pending(&self) -> usize {
        self.aggregations.lock().await.len()
    }

    /// Start a broadcast whose caller is the background context itself.
    pub(crate) async fn dispatch_local(
        &self,
        event: &EventName,
        args: Value,
    ) -> (CorrelationId, oneshot::Receiver<Vec<BroadcastReply>>) {
        let msg_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        self.start(event, msg_id.clone(), args, Sink::Local(tx)).await;
        (msg_id, rx)
    }

    /// Drop a broadcast the caller stopped waiting for.
    pub(crate) async fn cancel(&self, msg_id: &CorrelationId) -> bool {
        self.aggregations.lock().await.remove(msg_id).is_some()
    }

    async fn start(&self, event: &EventName, msg_id: CorrelationId, args: Value, sink: Sink) {
        let snapshot: Vec<PortSender> = self
            .groups
            .lock()
            .await
            .get(event)
            .map(|group| group.iter().filter(|p| p.is_connected()).cloned().collect())
            .unwrap_or_default();

        if snapshot.is_empty() {
            debug!(event = %event, msg_id = %msg_id, "no handler ports; broadcast resolves empty");
            sink.deliver(msg_id, Vec::new());
            return;
        }

        debug!(event = %event, msg_id = %msg_id, expected = snapshot.len(), "broadcast started");
        self.aggregations.lock().await.insert(
            msg_id.clone(),
            Aggregation {
                event: event.clone(),
                expected: snapshot.len(),
                responders: HashSet::new(),
                results: Vec::new(),
                sink,
            },
        );
        self.spawn_expiry(msg_id.clone());

        let request = PortMessage::Request {
            msg_id: msg_id.clone(),
            args,
        };
        for port in &snapshot {
            if let Err(e) = port.post(&request) {
                debug!(event = %event, port = %port.id(), error = %e, "handler port lost before relay");
                self.forfeit(&msg_id).await;
            }
        }
    }

    /// A snapshot member can no longer reply; stop expecting it.
    async fn forfeit(&self, msg_id: &CorrelationId) {
        let finished = {
            let mut aggregations = self.aggregations.lock().await;
            let ready = aggregations.get_mut(msg_id).is_some_and(|aggregation| {
                aggregation.expected = aggregation.expected.saturating_sub(1);
                aggregation.is_complete()
            });
            if ready { aggregations.remove(msg_id) } else { None }
        };
        if let Some(aggregation) = finished {
            aggregation.sink.deliver(msg_id.clone(), aggregation.results);
        }
    }

    async fn record(&self, msg_id: CorrelationId, port: PortId, reply: BroadcastReply) {
        let finished = {
            let mut aggregations = self.aggregations.lock().await;
            let Some(aggregation) = aggregations.get_mut(&msg_id) else {
                debug!(msg_id = %msg_id, port = %port, "late broadcast reply dropped");
                return;
            };
            if !aggregation.responders.insert(port) {
                debug!(msg_id = %msg_id, port = %port, "duplicate broadcast reply dropped");
                return;
            }
            aggregation.results.push(reply);
            if aggregation.is_complete() {
                aggregations.remove(&msg_id)
            } else {
                None
            }
        };

        if let Some(aggregation) = finished {
            debug!(
                event = %aggregation.event,
                msg_id = %msg_id,
                replies = aggregation.results.len(),
                "broadcast complete"
            );
            aggregation.sink.deliver(msg_id, aggregation.results);
        }
    }

    fn spawn_expiry(&self, msg_id: CorrelationId) {
        let aggregations = Arc::clone(&self.aggregations);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = aggregations.lock().await.remove(&msg_id);
            if let Some(aggregation) = expired {
                debug!(
                    event = %aggregation.event,
                    msg_id = %msg_id,
                    collected = aggregation.results.len(),
                    expected = aggregation.expected,
                    "broadcast aggregation expired"
                );
            }
        });
    }

    async fn serve_handler_port(&self, event: EventName, port: Port) {
        let (tx, mut rx) = port.split();
        let port_id = tx.id();
        {
            let mut groups = self.groups.lock().await;
            groups.entry(event.clone()).or_default().push(tx.clone());
            // Confirm under the lock so no relayed request can overtake it.
            tx.post(&PortMessage::Joined).ok_quiet("confirm handler port");
        }
        debug!(event = %event, port = %port_id, "handler port joined");

        while let Some(value) = rx.recv().await {
            match PortMessage::parse(&value) {
                Ok(PortMessage::Response { msg_id, reply }) => {
                    self.record(msg_id, port_id, reply).await;
                }
                Ok(_) => debug!(event = %event, port = %port_id, "unexpected message on handler port"),
                Err(e) => debug!(event = %event, port = %port_id, error = %e, "malformed port message"),
            }
        }

        self.leave(&event, port_id).await;
    }

    async fn leave(&self, event: &EventName, port_id: PortId) {
        let mut groups = self.groups.lock().await;
        let emptied = groups.get_mut(event).is_some_and(|group| {
            group.retain(|port| port.id() != port_id);
            group.is_empty()
        });
        if emptied {
            groups.remove(event);
        }
        debug!(event = %event, port = %port_id, group_removed = emptied, "handler port left");
    }

    async fn serve_caller_port(&self, event: EventName, port: Port) {
        let (tx, mut rx) = port.split();
        while let Some(value) = rx.recv().await {
            match PortMessage::parse(&value) {
                Ok(PortMessage::Request { msg_id, args }) => {
                    self.start(&event, msg_id, args, Sink::Port(tx.clone())).await;
                }
                Ok(_) => debug!(event = %event, port = %tx.id(), "unexpected message on caller port"),
                Err(e) => debug!(event = %event, port = %tx.id(), error = %e, "malformed port message"),
            }
        }

        let caller = tx.id();
        self.aggregations
            .lock()
            .await
            .retain(|_, aggregation| !aggregation.sink.is_port(caller));
    }
}

#[async_trait]
impl ConnectListener for PortHub {
    async fn on_connect(&self, port: Port) {
        let event = port
            .name()
            .strip_prefix(self.prefix.as_str())
            .and_then(|name| EventName::new(name).ok());
        let Some(event) = event else {
            debug!(name = %port.name(), "port without broadcast prefix refused");
            port.disconnect();
            return;
        };

        let category = port
            .sender()
            .map_or(SenderCategory::Unknown, SenderInfo::category);
        match category {
            SenderCategory::ContentScript => self.serve_handler_port(event, port).await,
            SenderCategory::Extension => self.serve_caller_port(event, port).await,
            SenderCategory::Unknown => {
                debug!(event = %event, "port from unknown origin refused");
                port.disconnect();
            }
        }
    }
}
