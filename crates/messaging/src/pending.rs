//! Caller-side table of outstanding requests.
//!
//! Each entry is removed exactly once. The response path, the timeout path and
//! teardown all go through `remove`-style operations, so whichever observes
//! the entry first settles it and every later attempt is a benign no-op.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tabrelay_core::{CorrelationId, EventName};
use tabrelay_ipc::ResponsePayload;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

use crate::error::{RelayError, Result};

/// One outstanding request.
pub struct PendingRequest {
    event: EventName,
    created_at: DateTime<Utc>,
    ack: Option<oneshot::Sender<()>>,
    settle: oneshot::Sender<Result<Value>>,
}

impl PendingRequest {
    /// Event the request was dispatched for.
    pub fn event(&self) -> &EventName {
        &self.event
    }

    /// When the request was dispatched.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Deliver the final outcome to the waiting caller.
    pub fn settle(self, outcome: Result<Value>) {
        // The caller may have stopped waiting.
        let _ = self.settle.send(outcome);
    }
}

/// Turn a response payload into the caller-visible outcome.
pub fn outcome(event: &EventName, payload: ResponsePayload) -> Result<Value> {
    payload
        .into_result()
        .map_err(|error| RelayError::from_remote(event, error))
}

/// Receivers the dispatching caller waits on.
pub struct PendingHandle {
    /// Fires when the coordinator acknowledges the request.
    pub ack: oneshot::Receiver<()>,
    /// Fires with the final outcome.
    pub settled: oneshot::Receiver<Result<Value>>,
}

/// Outstanding requests of one context, keyed by correlation ID.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new request and return the receivers to wait on.
    pub async fn insert(&self, id: CorrelationId, event: EventName) -> PendingHandle {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (settle_tx, settle_rx) = oneshot::channel();
        let request = PendingRequest {
            event,
            created_at: Utc::now(),
            ack: Some(ack_tx),
            settle: settle_tx,
        };
        self.entries.lock().await.insert(id, request);
        PendingHandle {
            ack: ack_rx,
            settled: settle_rx,
        }
    }

    /// Mark a request acknowledged. Returns false for unknown or already
    /// acknowledged IDs.
    pub async fn acknowledge(&self, id: &CorrelationId) -> bool {
        let ack = self
            .entries
            .lock()
            .await
            .get_mut(id)
            .and_then(|request| request.ack.take());
        match ack {
            Some(ack) => {
                let _ = ack.send(());
                true
            }
            None => {
                debug!(correlation_id = %id, "acknowledgment for unknown request ignored");
                false
            }
        }
    }

    /// Settle and remove a request. Returns false if it was already gone.
    pub async fn settle(&self, id: &CorrelationId, outcome: Result<Value>) -> bool {
        match self.remove(id).await {
            Some(request) => {
                request.settle(outcome);
                true
            }
            None => {
                debug!(correlation_id = %id, "late or duplicate response dropped");
                false
            }
        }
    }

    /// Remove a request without settling it.
    pub async fn remove(&self, id: &CorrelationId) -> Option<PendingRequest> {
        self.entries.lock().await.remove(id)
    }

    /// Settle every outstanding request with the error `make` builds for it.
    ///
    /// Returns the number of requests settled.
    pub async fn fail_all(&self, make: impl Fn(&EventName) -> RelayError) -> usize {
        let drained: Vec<PendingRequest> = self.entries.lock().await.drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for request in drained {
            let error = make(&request.event);
            request.settle(Err(error));
        }
        count
    }

    /// Number of outstanding requests.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Check whether nothing is outstanding.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
