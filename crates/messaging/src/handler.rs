//! Handler callbacks and the single invocation combinator.
//!
//! Every route (direct, coordinated, broadcast) runs handlers through
//! [`invoke`], which always yields a [`ResponsePayload`]. A handler that
//! returns an error, fails to decode its arguments or panics becomes a tagged
//! failure; nothing escapes into the transport.

use std::any::Any;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tabrelay_core::EventName;
use tabrelay_ipc::{RemoteError, ResponsePayload};
use tracing::warn;

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, Result<Value, RemoteError>>;

/// A registered callback.
///
/// The returned future must not borrow the handler, so concurrent calls for
/// the same event can run independently.
pub trait Handler: Send + Sync + 'static {
    /// Start one invocation with JSON arguments.
    fn call(&self, args: Value) -> HandlerFuture;
}

struct FnHandler<F, A, R, E> {
    f: F,
    _marker: PhantomData<fn(A) -> (R, E)>,
}

impl<F, Fut, A, R, E> Handler for FnHandler<F, A, R, E>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    A: DeserializeOwned + 'static,
    R: Serialize + Send + 'static,
    E: Display + Debug + Send + 'static,
{
    fn call(&self, args: Value) -> HandlerFuture {
        let args: A = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => {
                let error = RemoteError::new(format!("invalid arguments: {e}"));
                return futures::future::ready(Err(error)).boxed();
            }
        };

        let fut = (self.f)(args);
        async move {
            let value = fut
                .await
                .map_err(|e| RemoteError::new(e.to_string()).with_stack(format!("{e:?}")))?;
            serde_json::to_value(value)
                .map_err(|e| RemoteError::new(format!("unserializable result: {e}")))
        }
        .boxed()
    }
}

/// Wrap an async function with typed arguments and result.
///
/// The error's `Display` becomes the remote message and its `Debug` form the
/// stack.
pub fn handler_fn<F, Fut, A, R, E>(f: F) -> Arc<dyn Handler>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    A: DeserializeOwned + 'static,
    R: Serialize + Send + 'static,
    E: Display + Debug + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    })
}

/// Wrap a synchronous function with typed arguments and result.
pub fn handler_sync<F, A, R, E>(f: F) -> Arc<dyn Handler>
where
    F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
    A: DeserializeOwned + 'static,
    R: Serialize + Send + 'static,
    E: Display + Debug + Send + 'static,
{
    handler_fn(move |args: A| futures::future::ready(f(args)))
}

/// Run a handler and convert every outcome into a response payload.
pub async fn invoke(event: &EventName, handler: &Arc<dyn Handler>, args: Value) -> ResponsePayload {
    let started = std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(args)));
    let outcome = match started {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(panic) => Err(panic),
    };

    match outcome {
        Ok(Ok(data)) => ResponsePayload::Success(data),
        Ok(Err(error)) => {
            warn!(event = %event, error = %error, "handler failed");
            ResponsePayload::Failure(error)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(event = %event, error = %message, "handler panicked");
            ResponsePayload::Failure(RemoteError::new(message).with_stack("handler panicked"))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}
