//! Typed event descriptors.
//!
//! A descriptor binds an event name to its argument and result types once, so
//! handler and caller code cannot disagree about the payload shape:
//!
//! ```ignore
//! static GREETING: LazyLock<RelayEvent<String, String>> =
//!     LazyLock::new(|| RelayEvent::new("greeting").expect("valid name"));
//!
//! GREETING.handle(&background, |name: String| async move {
//!     Ok::<_, Infallible>(format!("Hello, {name}!"))
//! }).await?;
//! let reply = GREETING.invoke(&popup, &"World".to_string()).await?;
//! ```

use std::fmt::{Debug, Display};
use std::future::Future;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tabrelay_core::{EventName, TabId};
use tabrelay_ipc::BroadcastReply;

use crate::context::{HandlerGuard, RelayContext};
use crate::direct::ChannelPattern;
use crate::error::Result;
use crate::handler::handler_fn;

fn encode<A: Serialize>(args: &A) -> Result<Value> {
    Ok(serde_json::to_value(args)?)
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R> {
    Ok(serde_json::from_value(value)?)
}

/// A coordinated event with typed arguments and result.
pub struct RelayEvent<A, R> {
    name: EventName,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> RelayEvent<A, R>
where
    A: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    /// Describe a coordinated event.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid event name.
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            name: EventName::new(name)?,
            _types: PhantomData,
        })
    }

    /// Event name on the wire.
    pub fn name(&self) -> &EventName {
        &self.name
    }

    /// Register `f` as this context's handler.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateHandler` if the context already handles the event.
    pub async fn handle<F, Fut, E>(&self, ctx: &RelayContext, f: F) -> Result<HandlerGuard>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Display + Debug + Send + 'static,
    {
        ctx.handle(self.name.clone(), handler_fn(f)).await
    }

    /// Dispatch through the coordinator and decode the result.
    ///
    /// # Errors
    ///
    /// Everything [`RelayContext::invoke`] returns, plus a serialization
    /// error if the result does not decode as `R`.
    pub async fn invoke(&self, ctx: &RelayContext, args: &A) -> Result<R> {
        decode(ctx.invoke(&self.name, encode(args)?).await?)
    }
}

/// A one-to-one channel that bypasses the coordinator.
pub struct DirectChannel<A, R> {
    pattern: ChannelPattern,
    name: EventName,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> DirectChannel<A, R>
where
    A: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    /// Describe a direct channel; `name` gets the pattern's prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty or otherwise invalid.
    pub fn new(pattern: ChannelPattern, name: &str) -> Result<Self> {
        Ok(Self {
            pattern,
            name: EventName::prefixed(pattern.prefix(), name)?,
            _types: PhantomData,
        })
    }

    /// Routing pattern of the channel.
    pub fn pattern(&self) -> ChannelPattern {
        self.pattern
    }

    /// Full, prefixed event name.
    pub fn name(&self) -> &EventName {
        &self.name
    }

    /// Register `f` as the channel's handler in this context.
    ///
    /// # Errors
    ///
    /// See [`RelayContext::handle_direct`].
    pub async fn handle<F, Fut, E>(&self, ctx: &RelayContext, f: F) -> Result<HandlerGuard>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Display + Debug + Send + 'static,
    {
        ctx.handle_direct(self.name.clone(), handler_fn(f)).await
    }

    /// Dispatch on the channel. Tab-bound patterns need `target`.
    ///
    /// # Errors
    ///
    /// See [`RelayContext::dispatch_direct`].
    pub async fn dispatch(&self, ctx: &RelayContext, args: &A, target: Option<TabId>) -> Result<R> {
        decode(ctx.dispatch_direct(&self.name, encode(args)?, target).await?)
    }
}

/// Per-handler outcome of a typed broadcast.
pub type TypedReply<R> = std::result::Result<R, String>;

/// A one-to-many event answered by every connected content script.
pub struct BroadcastEvent<A, R> {
    name: EventName,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> BroadcastEvent<A, R>
where
    A: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    /// Describe a broadcast event.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid event name.
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            name: EventName::new(name)?,
            _types: PhantomData,
        })
    }

    /// Event name on the wire.
    pub fn name(&self) -> &EventName {
        &self.name
    }

    /// Register `f` as this content script's handler.
    ///
    /// # Errors
    ///
    /// See [`RelayContext::handle_broadcast`].
    pub async fn handle<F, Fut, E>(&self, ctx: &RelayContext, f: F) -> Result<HandlerGuard>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Display + Debug + Send + 'static,
    {
        ctx.handle_broadcast(self.name.clone(), handler_fn(f)).await
    }

    /// Broadcast and decode each reply.
    ///
    /// A reply whose data does not decode as `R` becomes an `Err` entry; it
    /// does not fail the whole call.
    ///
    /// # Errors
    ///
    /// See [`RelayContext::broadcast`].
    pub async fn broadcast(&self, ctx: &RelayContext, args: &A) -> Result<Vec<TypedReply<R>>> {
        let replies = ctx.broadcast(&self.name, encode(args)?).await?;
        Ok(replies.into_iter().map(typed_reply).collect())
    }
}

fn typed_reply<R: DeserializeOwned>(reply: BroadcastReply) -> TypedReply<R> {
    reply
        .into_result()
        .map_err(|error| error.to_string())
        .and_then(|data| serde_json::from_value(data).map_err(|e| e.to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use serde_json::json;
    use tabrelay_ipc::RemoteError;

    #[test]
    fn test_direct_channel_prefixes_name() {
        let channel: DirectChannel<(), String> =
            DirectChannel::new(ChannelPattern::BackgroundToContent, "ping").unwrap();
        assert_eq!(channel.name().as_str(), "bg2cs:ping");
        assert_eq!(channel.pattern(), ChannelPattern::BackgroundToContent);
        assert!(DirectChannel::<(), ()>::new(ChannelPattern::ContentToBackground, "").is_err());
    }

    #[test]
    fn test_relay_event_rejects_blank_name() {
        assert!(RelayEvent::<(), ()>::new("").is_err());
        assert!(RelayEvent::<(), ()>::new("two words").is_err());
    }

    #[test]
    fn test_typed_reply_decodes_each_entry() {
        let ok: TypedReply<u32> = typed_reply(BroadcastReply::Data(json!(2)));
        assert_eq!(ok, Ok(2));

        let failed: TypedReply<u32> = typed_reply(BroadcastReply::Error(RemoteError::new("boom")));
        assert_eq!(failed, Err("boom".to_string()));

        let mistyped: TypedReply<u32> = typed_reply(BroadcastReply::Data(json!("two")));
        assert!(mistyped.is_err());
    }
}
