//! Shared fixtures: a simulated extension with a background, a popup and a
//! content script per tab, all on one in-memory runtime.

#![allow(dead_code)]

use std::time::Duration;

use tabrelay_core::{ContextKind, EventName, RelayConfig, Surface, TabId};
use tabrelay_ipc::InMemoryRuntime;
use tabrelay_messaging::RelayContext;

pub struct Extension {
    pub runtime: InMemoryRuntime,
    pub background: RelayContext,
    pub popup: RelayContext,
    pub tabs: Vec<(TabId, RelayContext)>,
}

impl Extension {
    pub fn tab(&self, index: usize) -> &RelayContext {
        &self.tabs[index].1
    }

    pub fn tab_id(&self, index: usize) -> TabId {
        self.tabs[index].0
    }
}

/// Timeouts short enough to keep failure-path tests fast.
pub fn fast_config() -> RelayConfig {
    RelayConfig::default()
        .with_ack_timeout_ms(200)
        .with_response_timeout_ms(2_000)
        .with_broadcast_timeout_ms(2_000)
}

pub fn event(name: &str) -> EventName {
    EventName::new(name).expect("valid event name")
}

pub async fn start(runtime: &InMemoryRuntime, kind: ContextKind, config: &RelayConfig) -> RelayContext {
    RelayContext::start(runtime.attach(kind).await, config.clone())
        .await
        .expect("context should start")
}

pub async fn boot(tabs: u32, config: RelayConfig) -> Extension {
    let runtime = InMemoryRuntime::new("tabrelaytest");
    let background = start(&runtime, ContextKind::Background, &config).await;
    let popup = start(
        &runtime,
        ContextKind::ExtensionPage {
            surface: Surface::Popup,
        },
        &config,
    )
    .await;

    let mut contexts = Vec::new();
    for n in 1..=tabs {
        let tab_id = TabId::new(n);
        let ctx = start(&runtime, ContextKind::ContentScript { tab_id }, &config).await;
        contexts.push((tab_id, ctx));
    }

    Extension {
        runtime,
        background,
        popup,
        tabs: contexts,
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
