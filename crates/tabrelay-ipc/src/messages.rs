//! Message types that cross context boundaries.
//!
//! Everything in this module is JSON-serializable; nothing else crosses a
//! boundary. Contexts never share memory, only these values.
//!
//! # Message Flow
//!
//! **Envelope (one-shot messages)**: one logical call progresses strictly
//! `request -> acknowledgment -> response`
//! - `Request` from Client to Relay, re-addressed Relay to Handler
//! - `Acknowledgment` from Relay to Client, sent before fan-out
//! - `Response` from Handler to Relay, re-addressed Relay to Client
//!
//! **PortMessage (long-lived ports)**: one broadcast call
//! - `Joined` from coordinator to a handler port once it is in the group
//! - `Request` from caller port to coordinator, relayed to every handler port
//! - `Response` from each handler port back to the coordinator
//! - `Responses` from coordinator to caller port, once all replies arrived

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabrelay_core::{CorrelationId, EventName, Role};

use crate::{TransportError, TransportResult};

/// Code carried by the explicit "no handler registered" failure.
pub const NO_HANDLER_CODE: &str = "NO_HANDLER";

/// Kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Acknowledgment,
    Response,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Acknowledgment => write!(f, "acknowledgment"),
            Self::Response => write!(f, "response"),
        }
    }
}

/// Request/response unit of the one-shot message transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// A call that expects a response.
    Request {
        id: CorrelationId,
        event: EventName,
        from: Role,
        to: Role,
        #[serde(default)]
        args: Value,
    },

    /// Early liveness signal from the coordinator.
    #[serde(alias = "relayAccessed")]
    Acknowledgment {
        id: CorrelationId,
        event: EventName,
        from: Role,
        to: Role,
    },

    /// Tagged result of a call.
    Response {
        id: CorrelationId,
        event: EventName,
        from: Role,
        to: Role,
        response: ResponsePayload,
    },
}

impl Envelope {
    /// Create a request envelope.
    #[must_use]
    pub fn request(id: CorrelationId, event: EventName, from: Role, to: Role, args: Value) -> Self {
        Self::Request {
            id,
            event,
            from,
            to,
            args,
        }
    }

    /// Create the coordinator's acknowledgment of a request.
    #[must_use]
    pub fn acknowledgment(id: CorrelationId, event: EventName) -> Self {
        Self::Acknowledgment {
            id,
            event,
            from: Role::Relay,
            to: Role::Client,
        }
    }

    /// Create a response envelope.
    #[must_use]
    pub fn response(
        id: CorrelationId,
        event: EventName,
        from: Role,
        to: Role,
        response: ResponsePayload,
    ) -> Self {
        Self::Response {
            id,
            event,
            from,
            to,
            response,
        }
    }

    /// Correlation ID of the logical call.
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        match self {
            Self::Request { id, .. } | Self::Acknowledgment { id, .. } | Self::Response { id, .. } => {
                id
            }
        }
    }

    /// Event the call belongs to.
    #[must_use]
    pub fn event(&self) -> &EventName {
        match self {
            Self::Request { event, .. }
            | Self::Acknowledgment { event, .. }
            | Self::Response { event, .. } => event,
        }
    }

    /// Declared sender role.
    #[must_use]
    pub fn from_role(&self) -> Role {
        match self {
            Self::Request { from, .. }
            | Self::Acknowledgment { from, .. }
            | Self::Response { from, .. } => *from,
        }
    }

    /// Declared recipient role.
    #[must_use]
    pub fn to_role(&self) -> Role {
        match self {
            Self::Request { to, .. } | Self::Acknowledgment { to, .. } | Self::Response { to, .. } => {
                *to
            }
        }
    }

    /// Kind of this envelope.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request { .. } => MessageKind::Request,
            Self::Acknowledgment { .. } => MessageKind::Acknowledgment,
            Self::Response { .. } => MessageKind::Response,
        }
    }

    /// Same envelope with new sender and recipient roles.
    #[must_use]
    pub fn readdressed(self, new_from: Role, new_to: Role) -> Self {
        match self {
            Self::Request {
                id, event, args, ..
            } => Self::Request {
                id,
                event,
                from: new_from,
                to: new_to,
                args,
            },
            Self::Acknowledgment { id, event, .. } => Self::Acknowledgment {
                id,
                event,
                from: new_from,
                to: new_to,
            },
            Self::Response {
                id,
                event,
                response,
                ..
            } => Self::Response {
                id,
                event,
                from: new_from,
                to: new_to,
                response,
            },
        }
    }

    /// Encode for the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments or response data fail to serialize.
    pub fn to_value(&self) -> TransportResult<Value> {
        serde_json::to_value(self).map_err(|e| TransportError::serialization_failed(e.to_string()))
    }

    /// Decode a transport value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an envelope. Receivers treat this
    /// as an irrelevant message, not a failure.
    pub fn parse(value: &Value) -> TransportResult<Self> {
        Self::deserialize(value).map_err(|e| TransportError::deserialization_failed(e.to_string()))
    }
}

/// Serialized form of a handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Human-readable message.
    pub message: String,
    /// Best-effort diagnostic trace; not structurally stable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Machine-readable marker for relay-level failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl RemoteError {
    /// Create a remote error with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            code: None,
        }
    }

    /// Attach a diagnostic trace.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// The explicit "no handler registered" failure.
    #[must_use]
    pub fn no_handler(event: &EventName) -> Self {
        Self {
            message: format!("No handler registered for '{event}'"),
            stack: None,
            code: Some(NO_HANDLER_CODE.to_string()),
        }
    }

    /// Check if this is the explicit "no handler registered" failure.
    #[must_use]
    pub fn is_no_handler(&self) -> bool {
        self.code.as_deref() == Some(NO_HANDLER_CODE)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Tagged result of a handler invocation.
///
/// On the wire this is `{ success, data?, error? }`; data and error are never
/// both present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub enum ResponsePayload {
    Success(Value),
    Failure(RemoteError),
}

impl ResponsePayload {
    /// Check if the handler succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert into a standard Result.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the handler failed.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Failure(error) => Err(error),
        }
    }

    /// Encode for the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the data fails to serialize.
    pub fn to_value(&self) -> TransportResult<Value> {
        serde_json::to_value(self).map_err(|e| TransportError::serialization_failed(e.to_string()))
    }

    /// Decode a transport value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a response payload.
    pub fn parse(value: &Value) -> TransportResult<Self> {
        Self::deserialize(value).map_err(|e| TransportError::deserialization_failed(e.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RemoteError>,
}

impl TryFrom<WireResponse> for ResponsePayload {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        match (wire.success, wire.data, wire.error) {
            (_, Some(_), Some(_)) => Err("response carries both data and error".to_string()),
            (true, data, None) => Ok(Self::Success(data.unwrap_or(Value::Null))),
            (false, None, Some(error)) => Ok(Self::Failure(error)),
            (false, None, None) => Err("failed response carries no error".to_string()),
            (true, None, Some(_)) => Err("successful response carries an error".to_string()),
            (false, Some(_), None) => Err("failed response carries data".to_string()),
        }
    }
}

impl From<ResponsePayload> for WireResponse {
    fn from(payload: ResponsePayload) -> Self {
        match payload {
            ResponsePayload::Success(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            ResponsePayload::Failure(error) => Self {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

/// Reply a handler context gives to a fan-out delivery it will serve.
///
/// Lets the coordinator tell "nobody has a handler" apart from "a handler is
/// still working" without waiting for the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub accepted: bool,
}

impl Accepted {
    /// Check whether a transport reply is a positive acceptance.
    #[must_use]
    pub fn is_accepted(reply: &Value) -> bool {
        Self::deserialize(reply).is_ok_and(|a| a.accepted)
    }
}

/// One entry of a broadcast result: `{data}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BroadcastReply {
    Data(Value),
    Error(RemoteError),
}

impl BroadcastReply {
    /// Check if this entry is a success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    /// Success data, if any.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Data(data) => Some(data),
            Self::Error(_) => None,
        }
    }

    /// Failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&RemoteError> {
        match self {
            Self::Data(_) => None,
            Self::Error(error) => Some(error),
        }
    }

    /// Convert into a standard Result.
    ///
    /// # Errors
    ///
    /// Returns the remote error if this handler failed.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self {
            Self::Data(data) => Ok(data),
            Self::Error(error) => Err(error),
        }
    }
}

impl From<ResponsePayload> for BroadcastReply {
    fn from(payload: ResponsePayload) -> Self {
        match payload {
            ResponsePayload::Success(data) => Self::Data(data),
            ResponsePayload::Failure(error) => Self::Error(error),
        }
    }
}

/// Traffic on a broadcast port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PortMessage {
    /// Coordinator confirms a handler port joined its event group.
    Joined,

    /// Caller to coordinator, and coordinator to each handler port.
    Request {
        #[serde(rename = "msgId")]
        msg_id: CorrelationId,
        #[serde(default)]
        args: Value,
    },

    /// One handler's reply.
    Response {
        #[serde(rename = "msgId")]
        msg_id: CorrelationId,
        reply: BroadcastReply,
    },

    /// Aggregated replies, in arrival order.
    Responses {
        #[serde(rename = "msgId")]
        msg_id: CorrelationId,
        results: Vec<BroadcastReply>,
    },
}

impl PortMessage {
    /// Message ID of the broadcast call, if this message belongs to one.
    #[must_use]
    pub fn msg_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::Joined => None,
            Self::Request { msg_id, .. }
            | Self::Response { msg_id, .. }
            | Self::Responses { msg_id, .. } => Some(msg_id),
        }
    }

    /// Decode a port value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a port message.
    pub fn parse(value: &Value) -> TransportResult<Self> {
        Self::deserialize(value).map_err(|e| TransportError::deserialization_failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn event(name: &str) -> EventName {
        EventName::new(name).expect("valid event name")
    }

    #[test]
    fn test_request_wire_shape() {
        let env = Envelope::request(
            CorrelationId::from_string("c-1"),
            event("greeting"),
            Role::Client,
            Role::Relay,
            json!("World"),
        );
        let value = env.to_value().unwrap();
        assert_eq!(
            value,
            json!({
                "type": "request",
                "id": "c-1",
                "event": "greeting",
                "from": "client",
                "to": "relay",
                "args": "World"
            })
        );
        assert_eq!(Envelope::parse(&value).unwrap(), env);
    }

    #[test]
    fn test_acknowledgment_accepts_legacy_tag() {
        let value = json!({
            "type": "relayAccessed",
            "id": "c-2",
            "event": "greeting",
            "from": "relay",
            "to": "client"
        });
        let env = Envelope::parse(&value).unwrap();
        assert_eq!(env.kind(), MessageKind::Acknowledgment);
        assert_eq!(env.to_role(), Role::Client);
    }

    #[test]
    fn test_request_without_args_defaults_to_null() {
        let value = json!({
            "type": "request",
            "id": "c-3",
            "event": "ping",
            "from": "client",
            "to": "relay"
        });
        let env = Envelope::parse(&value).unwrap();
        assert!(matches!(env, Envelope::Request { args: Value::Null, .. }));
    }

    #[test]
    fn test_readdressed_keeps_id_and_payload() {
        let env = Envelope::request(
            CorrelationId::from_string("c-4"),
            event("sum"),
            Role::Client,
            Role::Relay,
            json!([1, 2]),
        );
        let relayed = env.clone().readdressed(Role::Relay, Role::Handler);
        assert_eq!(relayed.id(), env.id());
        assert_eq!(relayed.from_role(), Role::Relay);
        assert_eq!(relayed.to_role(), Role::Handler);
        assert!(matches!(relayed, Envelope::Request { ref args, .. } if *args == json!([1, 2])));
    }

    #[test]
    fn test_non_envelope_is_rejected() {
        assert!(Envelope::parse(&json!({"hello": "world"})).is_err());
        assert!(Envelope::parse(&json!("text")).is_err());
    }

    #[test]
    fn test_response_payload_wire_shape() {
        let ok = ResponsePayload::Success(json!(2));
        assert_eq!(ok.to_value().unwrap(), json!({"success": true, "data": 2}));

        let failed = ResponsePayload::Failure(RemoteError::new("boom").with_stack("at handler"));
        assert_eq!(
            failed.to_value().unwrap(),
            json!({"success": false, "error": {"message": "boom", "stack": "at handler"}})
        );
    }

    #[test]
    fn test_response_payload_rejects_data_and_error_together() {
        let value = json!({"success": true, "data": 1, "error": {"message": "x"}});
        assert!(ResponsePayload::parse(&value).is_err());
    }

    #[test]
    fn test_response_payload_rejects_failure_without_error() {
        assert!(ResponsePayload::parse(&json!({"success": false})).is_err());
    }

    #[test]
    fn test_success_without_data_is_null() {
        let payload = ResponsePayload::parse(&json!({"success": true})).unwrap();
        assert_eq!(payload, ResponsePayload::Success(Value::Null));
    }

    #[test]
    fn test_no_handler_marker() {
        let err = RemoteError::no_handler(&event("cs2bg:missing"));
        assert!(err.is_no_handler());
        assert!(err.message.contains("cs2bg:missing"));
        assert!(!RemoteError::new("boom").is_no_handler());
    }

    #[test]
    fn test_accepted_detection() {
        assert!(Accepted::is_accepted(&json!({"accepted": true})));
        assert!(!Accepted::is_accepted(&json!({"accepted": false})));
        assert!(!Accepted::is_accepted(&json!({"success": true})));
    }

    #[test]
    fn test_broadcast_reply_shapes() {
        let data = serde_json::to_value(BroadcastReply::Data(json!(2))).unwrap();
        assert_eq!(data, json!({"data": 2}));

        let error = serde_json::to_value(BroadcastReply::Error(RemoteError::new("nope"))).unwrap();
        assert_eq!(error, json!({"error": {"message": "nope"}}));
    }

    #[test]
    fn test_port_message_uses_msg_id() {
        let msg = PortMessage::Request {
            msg_id: CorrelationId::from_string("m-1"),
            args: json!("hi"),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "request", "msgId": "m-1", "args": "hi"}));
        let parsed = PortMessage::parse(&value).unwrap();
        assert_eq!(parsed.msg_id().map(CorrelationId::as_str), Some("m-1"));
    }

    #[test]
    fn test_joined_has_no_msg_id() {
        let value = serde_json::to_value(PortMessage::Joined).unwrap();
        assert_eq!(value, json!({"type": "joined"}));
        assert!(PortMessage::parse(&value).unwrap().msg_id().is_none());
    }
}
