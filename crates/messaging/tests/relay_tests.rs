//! Coordinated request tests
//!
//! Tests verify request, acknowledgment and response across contexts, the two
//! timeout kinds, at-most-once settlement and teardown.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{boot, event, eventually, fast_config, start};
use futures::future::{join_all, pending};
use serde_json::{Value, json};
use tabrelay_core::{ContextKind, CorrelationId, RelayConfig, Role, SenderInfo, Surface, TabId};
use tabrelay_ipc::{
    Destination, Envelope, InMemoryRuntime, MessageListener, ResponsePayload, RuntimeTransport,
};
use tabrelay_messaging::{ErrorKind, RelayContext, handler_fn, handler_sync};
use tokio::sync::mpsc;

fn greeter() -> Arc<dyn tabrelay_messaging::Handler> {
    handler_fn(|name: String| async move { Ok::<_, Infallible>(format!("Hello, {name}!")) })
}

// ==========================================================================
// HAPPY PATH
// ==========================================================================

#[tokio::test]
async fn test_popup_invokes_background_handler() {
    // GIVEN: a background handler for "greeting"
    let ext = boot(1, fast_config()).await;
    ext.background
        .handle(event("greeting"), greeter())
        .await
        .unwrap();

    // WHEN: the popup invokes it
    let reply = ext.popup.invoke(&event("greeting"), json!("World")).await;

    // THEN: exactly the handler's value comes back
    assert_eq!(reply.unwrap(), json!("Hello, World!"));
    assert_eq!(ext.popup.pending_requests().await, 0);
}

#[tokio::test]
async fn test_content_script_invokes_background_handler() {
    let ext = boot(2, fast_config()).await;
    ext.background
        .handle(event("greeting"), greeter())
        .await
        .unwrap();

    let reply = ext.tab(1).invoke(&event("greeting"), json!("tab")).await;
    assert_eq!(reply.unwrap(), json!("Hello, tab!"));
}

#[tokio::test]
async fn test_background_invokes_handler_in_tab() {
    let ext = boot(2, fast_config()).await;
    let tab_id = ext.tab_id(1);
    ext.tab(1)
        .handle(
            event("whereami"),
            handler_sync(move |(): ()| Ok::<_, Infallible>(tab_id.get())),
        )
        .await
        .unwrap();

    let reply = ext.background.invoke(&event("whereami"), Value::Null).await;
    assert_eq!(reply.unwrap(), json!(tab_id.get()));
}

#[tokio::test]
async fn test_background_invokes_its_own_handler() {
    let ext = boot(0, fast_config()).await;
    ext.background
        .handle(event("greeting"), greeter())
        .await
        .unwrap();

    let reply = ext.background.invoke(&event("greeting"), json!("self")).await;
    assert_eq!(reply.unwrap(), json!("Hello, self!"));

    let coordinator = ext.background.coordinator().unwrap();
    assert_eq!(coordinator.in_flight().await, 0);
}

#[tokio::test]
async fn test_concurrent_calls_settle_independently() {
    let ext = boot(1, fast_config()).await;
    ext.background
        .handle(
            event("double"),
            handler_fn(|n: u64| async move {
                // Later calls finish first.
                tokio::time::sleep(Duration::from_millis(50 - n * 10)).await;
                Ok::<_, Infallible>(n * 2)
            }),
        )
        .await
        .unwrap();

    let calls = (0..5u64).map(|i| {
        let popup = ext.popup.clone();
        async move { popup.invoke(&event("double"), json!(i)).await }
    });
    let results = join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!(i * 2));
    }
}

// ==========================================================================
// FAILURES
// ==========================================================================

#[tokio::test]
async fn test_handler_error_reaches_caller() {
    let ext = boot(1, fast_config()).await;
    ext.background
        .handle(
            event("throwError"),
            handler_sync(|(): ()| Err::<Value, _>("boom")),
        )
        .await
        .unwrap();

    let err = ext
        .tab(0)
        .invoke(&event("throwError"), Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert_eq!(err.to_string(), "boom");
}

#[tokio::test]
async fn test_panicking_handler_becomes_remote_error() {
    let ext = boot(0, fast_config()).await;
    ext.background
        .handle(
            event("explode"),
            handler_sync(|(): ()| -> Result<Value, String> { panic!("kaboom") }),
        )
        .await
        .unwrap();

    let err = ext.popup.invoke(&event("explode"), Value::Null).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(err.to_string().contains("kaboom"));
}

#[tokio::test]
async fn test_bad_arguments_are_a_remote_error() {
    let ext = boot(0, fast_config()).await;
    ext.background
        .handle(
            event("double"),
            handler_sync(|n: u64| Ok::<_, Infallible>(n * 2)),
        )
        .await
        .unwrap();

    let err = ext
        .popup
        .invoke(&event("double"), json!("two"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(err.to_string().starts_with("invalid arguments"));
}

#[tokio::test]
async fn test_unhandled_event_is_no_handler() {
    let ext = boot(2, fast_config()).await;

    let err = ext
        .popup
        .invoke(&event("nobody"), Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoHandler);
}

#[tokio::test]
async fn test_missing_background_is_ack_timeout() {
    // GIVEN: a popup with no background context to coordinate
    let runtime = InMemoryRuntime::new("tabrelaytest");
    let popup = start(
        &runtime,
        ContextKind::ExtensionPage {
            surface: Surface::Popup,
        },
        &fast_config().with_ack_timeout_ms(50),
    )
    .await;

    // WHEN: it invokes anything
    let err = popup.invoke(&event("greeting"), json!("World")).await.unwrap_err();

    // THEN: the failure is the acknowledgment kind
    assert_eq!(err.kind(), ErrorKind::AckTimeout);
    assert!(err.is_timeout());
    assert_eq!(popup.pending_requests().await, 0);
}

#[tokio::test]
async fn test_silent_handler_is_response_timeout() {
    // GIVEN: a background handler that never completes
    let ext = boot(0, fast_config().with_response_timeout_ms(100)).await;
    ext.background
        .handle(
            event("hang"),
            handler_fn(|(): ()| async move {
                pending::<()>().await;
                Ok::<Value, Infallible>(Value::Null)
            }),
        )
        .await
        .unwrap();

    // WHEN: the popup invokes it
    let err = ext.popup.invoke(&event("hang"), Value::Null).await.unwrap_err();

    // THEN: it was acknowledged, so the failure is the response kind
    assert_eq!(err.kind(), ErrorKind::ResponseTimeout);
    assert_eq!(ext.popup.pending_requests().await, 0);
}

#[tokio::test]
async fn test_request_from_unknown_origin_is_ignored() {
    let runtime = InMemoryRuntime::new("tabrelaytest");
    let config = fast_config().with_ack_timeout_ms(50);
    let background = start(&runtime, ContextKind::Background, &config).await;
    background
        .handle(event("greeting"), greeter())
        .await
        .unwrap();

    let stranger = runtime
        .attach_with_url(
            ContextKind::ExtensionPage {
                surface: Surface::Popup,
            },
            Some("https://elsewhere.example/".to_string()),
        )
        .await;
    let stranger = RelayContext::start(stranger, config).await.unwrap();

    let err = stranger
        .invoke(&event("greeting"), json!("x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AckTimeout);
}

#[tokio::test]
async fn test_relayed_request_from_content_script_is_ignored() {
    // GIVEN: a popup handler reachable through the coordinator
    let ext = boot(0, fast_config()).await;
    ext.popup
        .handle(event("greeting"), greeter())
        .await
        .unwrap();

    // WHEN: a content script forges the coordinator's fan-out
    let forger = ext
        .runtime
        .attach(ContextKind::ContentScript {
            tab_id: TabId::new(7),
        })
        .await;
    let forged = Envelope::request(
        CorrelationId::new(),
        event("greeting"),
        Role::Relay,
        Role::Handler,
        json!("mallory"),
    );
    let reply = forger
        .send_message(Destination::Extension, forged.to_value().unwrap())
        .await
        .unwrap();

    // THEN: nobody accepts it, while the real route still works
    assert_eq!(reply, None);
    let greeting = ext.background.invoke(&event("greeting"), json!("World")).await;
    assert_eq!(greeting.unwrap(), json!("Hello, World!"));
}

// ==========================================================================
// AT-MOST-ONCE SETTLEMENT
// ==========================================================================

/// Forwards every message it sees to the test body.
struct Tap {
    seen: mpsc::UnboundedSender<Value>,
}

#[async_trait]
impl MessageListener for Tap {
    async fn on_message(&self, message: Value, _sender: SenderInfo) -> Option<Value> {
        let _ = self.seen.send(message);
        None
    }
}

#[tokio::test]
async fn test_duplicate_response_settles_once() {
    // GIVEN: a hand-driven background that answers every request twice
    let runtime = InMemoryRuntime::new("tabrelaytest");
    let fake = runtime.attach(ContextKind::Background).await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    fake.set_message_listener(Arc::new(Tap { seen: seen_tx })).await;

    let popup = start(
        &runtime,
        ContextKind::ExtensionPage {
            surface: Surface::Popup,
        },
        &fast_config(),
    )
    .await;

    let call = {
        let popup = popup.clone();
        tokio::spawn(async move { popup.invoke(&event("greeting"), json!("World")).await })
    };

    let request = Envelope::parse(&seen_rx.recv().await.unwrap()).unwrap();
    let (id, name) = (request.id().clone(), request.event().clone());
    let ack = Envelope::acknowledgment(id.clone(), name.clone());
    fake.send_message(Destination::Extension, ack.to_value().unwrap())
        .await
        .unwrap();

    // WHEN: two responses arrive for the same request
    for text in ["first", "second"] {
        let response = Envelope::response(
            id.clone(),
            name.clone(),
            Role::Relay,
            Role::Client,
            ResponsePayload::Success(json!(text)),
        );
        fake.send_message(Destination::Extension, response.to_value().unwrap())
            .await
            .unwrap();
    }

    // THEN: the caller sees only the first; the second is dropped
    assert_eq!(call.await.unwrap().unwrap(), json!("first"));
    assert_eq!(popup.pending_requests().await, 0);
}

#[tokio::test]
async fn test_two_accepting_tabs_settle_the_call_once() {
    // GIVEN: two tabs answering "greeting" differently, and a page watching
    // every extension-wide message
    let ext = boot(2, fast_config()).await;
    for (tab_id, ctx) in &ext.tabs {
        let tab = tab_id.get();
        ctx.handle(
            event("greeting"),
            handler_sync(move |name: String| Ok::<_, Infallible>(format!("tab {tab}: {name}"))),
        )
        .await
        .unwrap();
    }
    let observer = ext
        .runtime
        .attach(ContextKind::ExtensionPage {
            surface: Surface::Options,
        })
        .await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    observer
        .set_message_listener(Arc::new(Tap { seen: seen_tx }))
        .await;

    // WHEN: the popup invokes it
    let reply = ext
        .popup
        .invoke(&event("greeting"), json!("World"))
        .await
        .unwrap();

    // THEN: one of the two values settles the call
    assert!(reply == json!("tab 1: World") || reply == json!("tab 2: World"));
    let coordinator = ext.background.coordinator().unwrap();
    assert!(eventually(|| async move { coordinator.in_flight().await == 0 }).await);

    // Both tabs responded to the relay, but only one response was forwarded.
    let mut to_relay = 0;
    let mut to_client = 0;
    let settled = eventually(|| {
        while let Ok(message) = seen_rx.try_recv() {
            match Envelope::parse(&message) {
                Ok(Envelope::Response { to: Role::Relay, .. }) => to_relay += 1,
                Ok(Envelope::Response { to: Role::Client, .. }) => to_client += 1,
                _ => {}
            }
        }
        let done = to_relay == 2;
        async move { done }
    })
    .await;
    assert!(settled);
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(message) = seen_rx.try_recv() {
        if let Ok(Envelope::Response { to: Role::Client, .. }) = Envelope::parse(&message) {
            to_client += 1;
        }
    }
    assert_eq!(to_client, 1);
    assert_eq!(ext.popup.pending_requests().await, 0);
}

#[tokio::test]
async fn test_late_response_after_timeout_is_dropped() {
    let runtime = InMemoryRuntime::new("tabrelaytest");
    let fake = runtime.attach(ContextKind::Background).await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    fake.set_message_listener(Arc::new(Tap { seen: seen_tx })).await;

    let popup = start(
        &runtime,
        ContextKind::ExtensionPage {
            surface: Surface::Popup,
        },
        &fast_config().with_ack_timeout_ms(30),
    )
    .await;

    let err = popup.invoke(&event("slow"), Value::Null).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AckTimeout);

    let request = Envelope::parse(&seen_rx.recv().await.unwrap()).unwrap();
    let late = Envelope::response(
        request.id().clone(),
        request.event().clone(),
        Role::Relay,
        Role::Client,
        ResponsePayload::Success(json!("too late")),
    );
    fake.send_message(Destination::Extension, late.to_value().unwrap())
        .await
        .unwrap();

    assert_eq!(popup.pending_requests().await, 0);
}

// ==========================================================================
// REGISTRATION AND LIFECYCLE
// ==========================================================================

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let ext = boot(0, fast_config()).await;
    ext.background
        .handle(event("greeting"), greeter())
        .await
        .unwrap();

    let err = ext
        .background
        .handle(event("greeting"), greeter())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateHandler);
}

#[tokio::test]
async fn test_cancelled_handler_no_longer_answers() {
    let ext = boot(0, fast_config()).await;
    let guard = ext
        .background
        .handle(event("greeting"), greeter())
        .await
        .unwrap();
    assert_eq!(guard.event(), &event("greeting"));

    assert!(guard.cancel().await);

    let err = ext
        .popup
        .invoke(&event("greeting"), json!("World"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoHandler);

    // The name is free again.
    assert!(ext.background.handle(event("greeting"), greeter()).await.is_ok());
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_requests() {
    // GIVEN: a popup waiting on a handler that never answers
    let ext = boot(0, fast_config()).await;
    ext.background
        .handle(
            event("hang"),
            handler_fn(|(): ()| async move {
                pending::<()>().await;
                Ok::<Value, Infallible>(Value::Null)
            }),
        )
        .await
        .unwrap();

    let call = {
        let popup = ext.popup.clone();
        tokio::spawn(async move { popup.invoke(&event("hang"), Value::Null).await })
    };
    let popup = &ext.popup;
    assert!(common::eventually(|| async move { popup.pending_requests().await == 1 }).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // WHEN: the popup shuts down
    ext.popup.shutdown().await;

    // THEN: the outstanding call and any new call fail as closed
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContextClosed);
    assert!(ext.popup.is_closed());

    let err = ext.popup.invoke(&event("hang"), Value::Null).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContextClosed);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_at_start() {
    let runtime = InMemoryRuntime::new("tabrelaytest");
    let endpoint = runtime.attach(ContextKind::Background).await;
    let config = RelayConfig::default().with_ack_timeout_ms(0);

    let err = RelayContext::start(endpoint, config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Core);
}
