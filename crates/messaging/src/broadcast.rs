//! Context-side halves of a one-to-many broadcast.
//!
//! - Handler side: a content script keeps one port per event open to the
//!   background hub and answers every relayed request on it.
//! - Caller side: an extension page opens a port per call, posts the request
//!   and waits for the aggregated replies.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tabrelay_core::{CorrelationId, EventName, HandlerId, ResultExt};
use tabrelay_ipc::{BroadcastReply, PortMessage, PortReceiver, PortSender, RuntimeTransport};
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::handler::{Handler, invoke};
use crate::registry::HandlerRegistry;

/// Port name carrying broadcast traffic for `event`.
pub fn port_name(prefix: &str, event: &EventName) -> String {
    format!("{prefix}{event}")
}

/// Wait for the hub to confirm the handler port joined its group.
///
/// # Errors
///
/// Returns `AckTimeout` if no confirmation arrives in time, or a transport
/// error if the port closes first (no background hub is listening).
pub(crate) async fn await_joined(
    event: &EventName,
    rx: &mut PortReceiver,
    name: &str,
    timeout: Duration,
) -> Result<()> {
    let first = tokio::time::timeout(timeout, rx.recv())
        .await
        .map_err(|_| RelayError::ack_timeout(event, millis(timeout)))?;

    match first.as_ref().map(PortMessage::parse) {
        Some(Ok(PortMessage::Joined)) => Ok(()),
        Some(_) => Err(RelayError::serialization(format!(
            "expected join confirmation on '{name}'"
        ))),
        None => Err(tabrelay_ipc::TransportError::port_disconnected(name).into()),
    }
}

/// Answer relayed requests on a handler port until it disconnects.
///
/// The handler is captured once, so requests already relayed finish even if
/// the registration is cancelled meanwhile.
pub(crate) async fn serve_handler_port(
    event: EventName,
    id: HandlerId,
    handler: Arc<dyn Handler>,
    registry: Arc<HandlerRegistry>,
    tx: PortSender,
    mut rx: PortReceiver,
) {
    while let Some(value) = rx.recv().await {
        let (msg_id, args) = match PortMessage::parse(&value) {
            Ok(PortMessage::Request { msg_id, args }) => (msg_id, args),
            Ok(_) => {
                debug!(event = %event, "unexpected message on handler port");
                continue;
            }
            Err(e) => {
                debug!(event = %event, error = %e, "malformed port message");
                continue;
            }
        };

        let (event, handler, tx) = (event.clone(), Arc::clone(&handler), tx.clone());
        tokio::spawn(async move {
            let reply = BroadcastReply::from(invoke(&event, &handler, args).await);
            tx.post(&PortMessage::Response { msg_id, reply })
                .ok_quiet("post broadcast reply");
        });
    }

    debug!(event = %event, handler_id = %id, "broadcast handler port closed");
    registry.unregister(&event, id).await;
}

/// Run one broadcast from an extension page over a fresh port.
///
/// A port that closes before any result arrives resolves empty; the hub
/// sends the aggregated array in one message, so there is never a partial
/// result to return.
///
/// # Errors
///
/// Returns `AggregationTimeout` if the results do not arrive within
/// `timeout`, or a transport error if the request cannot be posted.
pub(crate) async fn call_over_port(
    transport: &dyn RuntimeTransport,
    name: &str,
    event: &EventName,
    args: Value,
    timeout: Duration,
) -> Result<Vec<BroadcastReply>> {
    let mut port = transport.connect(name).await?;
    let msg_id = CorrelationId::new();

    if let Err(e) = port.post(&PortMessage::Request {
        msg_id: msg_id.clone(),
        args,
    }) {
        port.disconnect();
        return Err(e.into());
    }

    let collected = tokio::time::timeout(timeout, async {
        while let Some(value) = port.recv().await {
            match PortMessage::parse(&value) {
                Ok(PortMessage::Responses {
                    msg_id: reply_id,
                    results,
                }) if reply_id == msg_id => return results,
                _ => debug!(event = %event, "unrelated message on caller port"),
            }
        }
        debug!(event = %event, msg_id = %msg_id, "caller port closed before results");
        Vec::new()
    })
    .await;

    port.disconnect();
    collected.map_err(|_| RelayError::aggregation_timeout(event, millis(timeout)))
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
