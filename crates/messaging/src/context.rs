//! The per-context relay instance.
//!
//! A [`RelayContext`] owns every table one execution context needs: handler
//! registries per route, the caller-side pending table and, in the background
//! context only, the [`Coordinator`]. It is built once at context startup with
//! an explicit [`ContextKind`] and handed to whatever code dispatches or
//! handles events there.
//!
//! Routes:
//! - **coordinated**: `handle` / `invoke`, through the background coordinator
//!   with acknowledgment
//! - **direct**: `handle_direct` / `dispatch_direct`, prefixed one-to-one
//!   channels that skip the coordinator
//! - **broadcast**: `handle_broadcast` / `broadcast`, one-to-many over ports

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tabrelay_core::{
    ContextId, ContextKind, CorrelationId, EventName, HandlerId, RelayConfig, ResultExt, Role,
    SenderCategory, SenderInfo, TabId,
};
use tabrelay_ipc::{
    Accepted, BroadcastReply, Destination, Envelope, MessageListener, PortSender, RemoteError,
    ResponsePayload, RuntimeTransport,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::broadcast::{await_joined, call_over_port, millis, port_name, serve_handler_port};
use crate::coordinator::{Coordinator, Origin};
use crate::direct::ChannelPattern;
use crate::error::{RelayError, Result};
use crate::handler::{Handler, invoke};
use crate::hub::PortHub;
use crate::pending::{PendingTable, outcome};
use crate::registry::HandlerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Coordinated,
    Direct,
    Broadcast,
}

struct Inner {
    kind: ContextKind,
    transport: Arc<dyn RuntimeTransport>,
    config: RelayConfig,
    coordinated: Arc<HandlerRegistry>,
    direct: Arc<HandlerRegistry>,
    broadcast: Arc<HandlerRegistry>,
    pending: Arc<PendingTable>,
    coordinator: Option<Arc<Coordinator>>,
    broadcast_ports: Mutex<HashMap<HandlerId, PortSender>>,
    closed: AtomicBool,
}

/// Relay instance of one execution context.
///
/// Cheap to clone; clones share the same tables.
#[derive(Clone)]
pub struct RelayContext {
    inner: Arc<Inner>,
}

impl RelayContext {
    /// Start a relay instance on an attached runtime endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn start<T: RuntimeTransport + 'static>(transport: T, config: RelayConfig) -> Result<Self> {
        Self::with_transport(Arc::new(transport), config).await
    }

    /// Start a relay instance on a shared transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn with_transport(
        transport: Arc<dyn RuntimeTransport>,
        config: RelayConfig,
    ) -> Result<Self> {
        config.validate()?;
        let kind = transport.kind();
        let coordinated = Arc::new(HandlerRegistry::new());
        let pending = Arc::new(PendingTable::new());

        let coordinator = if kind.is_background() {
            let hub = Arc::new(PortHub::new(
                config.broadcast_port_prefix.clone(),
                config.broadcast_timeout(),
            ));
            transport.set_connect_listener(hub.clone()).await;
            Some(Coordinator::new(
                Arc::clone(&transport),
                Arc::clone(&coordinated),
                Arc::clone(&pending),
                config.ack_timeout() + config.response_timeout(),
                hub,
            ))
        } else {
            None
        };

        let inner = Arc::new(Inner {
            kind,
            transport: Arc::clone(&transport),
            config,
            coordinated,
            direct: Arc::new(HandlerRegistry::new()),
            broadcast: Arc::new(HandlerRegistry::new()),
            pending,
            coordinator,
            broadcast_ports: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        transport
            .set_message_listener(Arc::new(ContextListener {
                inner: Arc::downgrade(&inner),
            }))
            .await;

        info!(context = %kind, context_id = %transport.context_id(), "relay context started");
        Ok(Self { inner })
    }

    /// Kind this instance was started as.
    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    /// Runtime identity of this context.
    pub fn context_id(&self) -> ContextId {
        self.inner.transport.context_id()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// The coordinator, present only in the background context.
    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.inner.coordinator.as_deref()
    }

    /// Outstanding coordinated requests dispatched from this context.
    pub async fn pending_requests(&self) -> usize {
        self.inner.pending.len().await
    }

    // ------------------------------------------------------------------
    // Coordinated route
    // ------------------------------------------------------------------

    /// Handle a coordinated event in this context.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateHandler` if this context already handles the event.
    pub async fn handle(&self, event: EventName, handler: Arc<dyn Handler>) -> Result<HandlerGuard> {
        self.ensure_open(&event)?;
        let id = self.inner.coordinated.register(event.clone(), handler).await?;
        Ok(self.guard(Route::Coordinated, event, id))
    }

    /// Dispatch a coordinated event and wait for the single response.
    ///
    /// # Errors
    ///
    /// - `AckTimeout` if the coordinator does not acknowledge in time
    /// - `ResponseTimeout` if no response follows the acknowledgment in time
    /// - `NoHandler` if no context handles the event
    /// - `Remote` with the handler's message if the handler failed
    pub async fn invoke(&self, event: &EventName, args: Value) -> Result<Value> {
        self.ensure_open(event)?;
        let inner = &self.inner;
        let id = CorrelationId::new();
        let handle = inner.pending.insert(id.clone(), event.clone()).await;
        let request = Envelope::request(id.clone(), event.clone(), Role::Client, Role::Relay, args);
        debug!(event = %event, correlation_id = %id, "dispatching request");

        match &inner.coordinator {
            Some(coordinator) => {
                tokio::spawn(Arc::clone(coordinator).on_request(request, Origin::Local));
            }
            None => {
                let sent = match request.to_value() {
                    Ok(value) => inner
                        .transport
                        .send_message(Destination::Extension, value)
                        .await
                        .map_err(RelayError::from),
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = sent {
                    inner.pending.remove(&id).await;
                    return Err(e);
                }
            }
        }

        let mut settled = handle.settled;
        let ack_timeout = inner.config.ack_timeout();
        if tokio::time::timeout(ack_timeout, handle.ack).await.is_err()
            && inner.pending.remove(&id).await.is_some()
        {
            debug!(event = %event, correlation_id = %id, "acknowledgment deadline passed");
            return Err(RelayError::ack_timeout(event, millis(ack_timeout)));
        }

        let response_timeout = inner.config.response_timeout();
        match tokio::time::timeout(response_timeout, &mut settled).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::context_closed(event)),
            Err(_) => {
                if inner.pending.remove(&id).await.is_some() {
                    debug!(event = %event, correlation_id = %id, "response deadline passed");
                    return Err(RelayError::response_timeout(event, millis(response_timeout)));
                }
                // Settled while the deadline fired.
                settled
                    .try_recv()
                    .unwrap_or_else(|_| Err(RelayError::context_closed(event)))
            }
        }
    }

    // ------------------------------------------------------------------
    // Direct route
    // ------------------------------------------------------------------

    /// Handle a prefixed direct-channel event in this context.
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if the event has no direct prefix
    /// - `WrongContext` if this context is not the channel's handler side
    /// - `DuplicateHandler` if this context already handles the event
    pub async fn handle_direct(
        &self,
        event: EventName,
        handler: Arc<dyn Handler>,
    ) -> Result<HandlerGuard> {
        self.ensure_open(&event)?;
        let pattern =
            ChannelPattern::from_event(&event).ok_or_else(|| RelayError::unknown_channel(&event))?;
        if !pattern.served_by(&self.inner.kind) {
            return Err(RelayError::wrong_context("handle_direct", self.inner.kind));
        }
        let id = self.inner.direct.register(event.clone(), handler).await?;
        Ok(self.guard(Route::Direct, event, id))
    }

    /// Dispatch a direct-channel event to its single handler.
    ///
    /// # Errors
    ///
    /// - `MissingTarget` if the channel targets a tab and `target` is `None`
    /// - `WrongContext` if this context may not dispatch on the channel
    /// - `NoHandler` if the receiving side has no handler
    /// - `Remote` with the handler's message if the handler failed
    /// - `ResponseTimeout` if no reply arrives in time
    pub async fn dispatch_direct(
        &self,
        event: &EventName,
        args: Value,
        target: Option<TabId>,
    ) -> Result<Value> {
        self.ensure_open(event)?;
        let pattern =
            ChannelPattern::from_event(event).ok_or_else(|| RelayError::unknown_channel(event))?;
        if !pattern.dispatchable_from(&self.inner.kind) {
            return Err(RelayError::wrong_context("dispatch_direct", self.inner.kind));
        }
        let destination = if pattern.needs_target() {
            Destination::Tab(target.ok_or_else(|| RelayError::missing_target(event))?)
        } else {
            Destination::Extension
        };

        let id = CorrelationId::new();
        let request = Envelope::request(id.clone(), event.clone(), Role::Client, Role::Handler, args);
        let value = request.to_value()?;
        debug!(event = %event, correlation_id = %id, destination = %destination, "direct dispatch");

        let timeout = self.inner.config.response_timeout();
        let reply = tokio::time::timeout(
            timeout,
            self.inner.transport.send_message(destination, value),
        )
        .await
        .map_err(|_| RelayError::response_timeout(event, millis(timeout)))??;

        let Some(reply) = reply else {
            return Err(RelayError::no_handler(event));
        };
        match Envelope::parse(&reply)? {
            Envelope::Response {
                id: reply_id,
                response,
                ..
            } if reply_id == id => outcome(event, response),
            other => Err(RelayError::serialization(format!(
                "unexpected {} reply to direct request",
                other.kind()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Broadcast route
    // ------------------------------------------------------------------

    /// Handle a broadcast event; content scripts only.
    ///
    /// Opens the event's port to the background and waits until the hub
    /// confirms the port joined the event group.
    ///
    /// # Errors
    ///
    /// - `WrongContext` outside content scripts
    /// - `DuplicateHandler` if this context already handles the event
    /// - `AckTimeout` or a transport error if the hub does not confirm
    pub async fn handle_broadcast(
        &self,
        event: EventName,
        handler: Arc<dyn Handler>,
    ) -> Result<HandlerGuard> {
        self.ensure_open(&event)?;
        let inner = &self.inner;
        if inner.kind.category() != SenderCategory::ContentScript {
            return Err(RelayError::wrong_context("handle_broadcast", inner.kind));
        }

        let id = inner
            .broadcast
            .register(event.clone(), Arc::clone(&handler))
            .await?;
        let name = port_name(&inner.config.broadcast_port_prefix, &event);

        let port = match inner.transport.connect(&name).await {
            Ok(port) => port,
            Err(e) => {
                inner.broadcast.unregister(&event, id).await;
                return Err(e.into());
            }
        };
        let (tx, mut rx) = port.split();

        if let Err(e) = await_joined(&event, &mut rx, &name, inner.config.ack_timeout()).await {
            tx.disconnect();
            inner.broadcast.unregister(&event, id).await;
            return Err(e);
        }

        inner.broadcast_ports.lock().await.insert(id, tx.clone());
        tokio::spawn(serve_handler_port(
            event.clone(),
            id,
            handler,
            Arc::clone(&inner.broadcast),
            tx,
            rx,
        ));
        Ok(self.guard(Route::Broadcast, event, id))
    }

    /// Broadcast to every connected handler context and collect all replies.
    ///
    /// Zero handlers is not an error: the result is empty. Each reply is
    /// either data or the failure of that one handler, in arrival order.
    ///
    /// # Errors
    ///
    /// - `WrongContext` from content scripts
    /// - `AggregationTimeout` if not every handler replied in time
    pub async fn broadcast(&self, event: &EventName, args: Value) -> Result<Vec<BroadcastReply>> {
        self.ensure_open(event)?;
        let inner = &self.inner;
        let timeout = inner.config.broadcast_timeout();

        if let Some(coordinator) = &inner.coordinator {
            let hub = coordinator.hub();
            let (msg_id, rx) = hub.dispatch_local(event, args).await;
            return match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(results)) => Ok(results),
                Ok(Err(_)) | Err(_) => {
                    hub.cancel(&msg_id).await;
                    Err(RelayError::aggregation_timeout(event, millis(timeout)))
                }
            };
        }

        if inner.kind.category() != SenderCategory::Extension {
            return Err(RelayError::wrong_context("broadcast", inner.kind));
        }
        let name = port_name(&inner.config.broadcast_port_prefix, event);
        call_over_port(inner.transport.as_ref(), &name, event, args, timeout).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Tear the context down.
    ///
    /// Outstanding requests fail with `ContextClosed`, broadcast ports close
    /// and the context detaches from the runtime. Repeated calls are no-ops.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let failed = inner.pending.fail_all(RelayError::context_closed).await;
        let ports: Vec<PortSender> = inner
            .broadcast_ports
            .lock()
            .await
            .drain()
            .map(|(_, port)| port)
            .collect();
        ports.iter().for_each(PortSender::disconnect);

        inner.coordinated.clear().await;
        inner.direct.clear().await;
        inner.broadcast.clear().await;
        inner.transport.detach().await;

        info!(
            context = %inner.kind,
            failed_requests = failed,
            closed_ports = ports.len(),
            "relay context shut down"
        );
    }

    /// Check whether `shutdown` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self, event: &EventName) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::context_closed(event));
        }
        Ok(())
    }

    fn guard(&self, route: Route, event: EventName, id: HandlerId) -> HandlerGuard {
        HandlerGuard {
            inner: Arc::downgrade(&self.inner),
            route,
            event,
            id,
        }
    }
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("kind", &self.inner.kind)
            .field("context_id", &self.context_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Cancellation handle returned by every `handle*` call.
///
/// Dropping the guard keeps the handler registered; call [`cancel`] to
/// remove it. Calls that already reached the handler still complete.
///
/// [`cancel`]: HandlerGuard::cancel
#[derive(Debug)]
pub struct HandlerGuard {
    inner: Weak<Inner>,
    route: Route,
    event: EventName,
    id: HandlerId,
}

impl HandlerGuard {
    /// Registration identity.
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Event the handler serves.
    pub fn event(&self) -> &EventName {
        &self.event
    }

    /// Deregister the handler. Returns false if it was already gone.
    pub async fn cancel(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        match self.route {
            Route::Coordinated => inner.coordinated.unregister(&self.event, self.id).await,
            Route::Direct => inner.direct.unregister(&self.event, self.id).await,
            Route::Broadcast => {
                let removed = inner.broadcast.unregister(&self.event, self.id).await;
                let port = inner.broadcast_ports.lock().await.remove(&self.id);
                if let Some(port) = port {
                    port.disconnect();
                }
                removed
            }
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Runtime message listener of one relay instance.
struct ContextListener {
    inner: Weak<Inner>,
}

#[async_trait]
impl MessageListener for ContextListener {
    async fn on_message(&self, message: Value, sender: SenderInfo) -> Option<Value> {
        let inner = self.inner.upgrade()?;
        if inner.closed.load(Ordering::Acquire) {
            return None;
        }
        let envelope = Envelope::parse(&message)
            .ok_quiet("parse incoming envelope")?;
        inner.route(envelope, sender).await
    }
}

impl Inner {
    /// Dispatch one incoming envelope by kind and addressing.
    ///
    /// Envelopes not addressed to a role this context plays are ignored.
    async fn route(&self, envelope: Envelope, sender: SenderInfo) -> Option<Value> {
        match envelope {
            Envelope::Request { to: Role::Relay, .. } => {
                self.relay_request(envelope, &sender);
                None
            }
            Envelope::Request {
                from: Role::Relay,
                to: Role::Handler,
                ..
            } => self.accept_relayed(envelope, &sender).await,
            Envelope::Request {
                from: Role::Client,
                to: Role::Handler,
                ..
            } => self.serve_direct(envelope, &sender).await,
            Envelope::Request { .. } => {
                debug!(correlation_id = %envelope.id(), "misaddressed request ignored");
                None
            }
            Envelope::Acknowledgment {
                to: Role::Client,
                ref id,
                ..
            } => {
                self.pending.acknowledge(id).await;
                None
            }
            Envelope::Acknowledgment { .. } => None,
            Envelope::Response { to: Role::Relay, .. } => {
                if let Some(coordinator) = &self.coordinator {
                    let coordinator = Arc::clone(coordinator);
                    tokio::spawn(async move { coordinator.on_response(envelope).await });
                }
                None
            }
            Envelope::Response {
                to: Role::Client,
                id,
                event,
                response,
                ..
            } => {
                self.pending.settle(&id, outcome(&event, response)).await;
                None
            }
            Envelope::Response { .. } => None,
        }
    }

    /// Background only: hand a caller's request to the coordinator.
    fn relay_request(&self, envelope: Envelope, sender: &SenderInfo) {
        let Some(coordinator) = &self.coordinator else {
            return;
        };
        if sender.category() == SenderCategory::Unknown {
            debug!(correlation_id = %envelope.id(), "request from unknown origin ignored");
            return;
        }
        tokio::spawn(Arc::clone(coordinator).on_request(envelope, Origin::of(sender)));
    }

    /// Accept a request fanned out by the coordinator if a handler is here.
    async fn accept_relayed(&self, envelope: Envelope, sender: &SenderInfo) -> Option<Value> {
        let Envelope::Request {
            id, event, args, ..
        } = envelope
        else {
            return None;
        };
        if sender.category() != SenderCategory::Extension {
            debug!(event = %event, sender = ?sender.category(), "relayed request from non-extension origin ignored");
            return None;
        }
        let handler = self.coordinated.get(&event).await?;

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let payload = invoke(&event, &handler, args).await;
            let response = Envelope::response(id, event, Role::Handler, Role::Relay, payload);
            if let Some(value) = response.to_value().ok_logged("encode handler response") {
                transport
                    .send_message(Destination::Extension, value)
                    .await
                    .ok_logged("send handler response");
            }
        });

        serde_json::to_value(Accepted { accepted: true }).ok()
    }

    /// Serve a direct-channel request and reply on the same send.
    async fn serve_direct(&self, envelope: Envelope, sender: &SenderInfo) -> Option<Value> {
        let Envelope::Request {
            id, event, args, ..
        } = envelope
        else {
            return None;
        };
        let pattern = ChannelPattern::from_event(&event)?;
        if !pattern.served_by(&self.kind) {
            return None;
        }
        if !pattern.accepts(sender.category()) {
            debug!(event = %event, sender = ?sender.category(), "direct request from wrong origin ignored");
            return None;
        }

        let payload = match self.direct.get(&event).await {
            Some(handler) => invoke(&event, &handler, args).await,
            None => {
                debug!(event = %event, "no direct handler registered");
                ResponsePayload::Failure(RemoteError::no_handler(&event))
            }
        };
        Envelope::response(id, event, Role::Handler, Role::Client, payload)
            .to_value()
            .ok_logged("encode direct response")
    }
}
