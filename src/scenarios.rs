//! Named end-to-end scenarios on a simulated extension.
//!
//! Each scenario boots its own [`SimulatedExtension`] so runs never share
//! handlers or tables.

use std::convert::Infallible;
use std::time::Instant;

use anyhow::bail;
use serde::Serialize;
use serde_json::{Value, json};
use tabrelay_core::{ContextKind, EventName, RelayConfig, Surface, TabId};
use tabrelay_ipc::{BroadcastReply, InMemoryRuntime};
use tabrelay_messaging::{ErrorKind, RelayContext, RelayError, Result, handler_fn, handler_sync};
use tracing::{debug, info};

/// Extension ID the simulated runtime uses.
pub const EXTENSION_ID: &str = "tabrelaydemo";

/// A background, a popup and one content script per tab on one runtime.
pub struct SimulatedExtension {
    pub runtime: InMemoryRuntime,
    pub background: RelayContext,
    pub popup: RelayContext,
    pub tabs: Vec<(TabId, RelayContext)>,
}

impl SimulatedExtension {
    /// Boot every context with the same configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn boot(tabs: u32, config: &RelayConfig) -> Result<Self> {
        let runtime = InMemoryRuntime::with_max_message_bytes(EXTENSION_ID, config.max_message_bytes);
        let background =
            RelayContext::start(runtime.attach(ContextKind::Background).await, config.clone()).await?;
        let popup = RelayContext::start(
            runtime
                .attach(ContextKind::ExtensionPage {
                    surface: Surface::Popup,
                })
                .await,
            config.clone(),
        )
        .await?;

        let mut contexts = Vec::with_capacity(tabs as usize);
        for n in 1..=tabs {
            let tab_id = TabId::new(n);
            let endpoint = runtime.attach(ContextKind::ContentScript { tab_id }).await;
            contexts.push((tab_id, RelayContext::start(endpoint, config.clone()).await?));
        }

        debug!(tabs, "simulated extension booted");
        Ok(Self {
            runtime,
            background,
            popup,
            tabs: contexts,
        })
    }

    /// Shut every context down.
    pub async fn shutdown(&self) {
        for (_, tab) in &self.tabs {
            tab.shutdown().await;
        }
        self.popup.shutdown().await;
        self.background.shutdown().await;
    }
}

/// Scenarios the CLI can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Popup greets through a background handler.
    Greeting,
    /// Popup counts characters in every tab.
    Count,
    /// A failing handler's message reaches the caller.
    ThrowError,
    /// Direct channels in both directions between background and a tab.
    Direct,
    /// A popup with no background times out on acknowledgment.
    AckTimeout,
    /// Every scenario above, in order.
    All,
}

impl Scenario {
    /// Scenarios `All` expands to.
    pub const EACH: [Self; 5] = [
        Self::Greeting,
        Self::Count,
        Self::ThrowError,
        Self::Direct,
        Self::AckTimeout,
    ];

    /// Name used on the command line and in reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Count => "count",
            Self::ThrowError => "throw-error",
            Self::Direct => "direct",
            Self::AckTimeout => "ack-timeout",
            Self::All => "all",
        }
    }

    /// Concrete scenarios this selection runs.
    pub fn expand(self) -> Vec<Self> {
        match self {
            Self::All => Self::EACH.to_vec(),
            single => vec![single],
        }
    }
}

/// One JSON line of CLI output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    /// Whether the outcome matched the expected outcome.
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Observed outcome before timing is attached.
struct Outcome {
    ok: bool,
    result: Option<Value>,
    error: Option<String>,
}

impl Outcome {
    fn expect_value(observed: Result<Value>, expected: &Value) -> Self {
        match observed {
            Ok(value) => Self {
                ok: &value == expected,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::unexpected(&e),
        }
    }

    fn expect_error(observed: Result<Value>, kind: ErrorKind, message: Option<&str>) -> Self {
        match observed {
            Ok(value) => Self {
                ok: false,
                result: Some(value),
                error: None,
            },
            Err(e) => Self {
                ok: e.kind() == kind && message.is_none_or(|m| e.to_string() == m),
                result: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn unexpected(error: &RelayError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Run one concrete scenario on a fresh extension.
///
/// # Errors
///
/// Returns an error if `scenario` is [`Scenario::All`] or the extension cannot
/// be set up; relay failures during the scenario itself are reported in the
/// result.
pub async fn run(
    scenario: Scenario,
    tabs: u32,
    config: &RelayConfig,
) -> anyhow::Result<ScenarioReport> {
    let started = Instant::now();
    let outcome = match scenario {
        Scenario::Greeting => greeting(tabs, config).await?,
        Scenario::Count => count(tabs, config).await?,
        Scenario::ThrowError => throw_error(tabs, config).await?,
        Scenario::Direct => direct(tabs, config).await?,
        Scenario::AckTimeout => ack_timeout(config).await?,
        Scenario::All => bail!("'all' must be expanded before running"),
    };

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(scenario = scenario.name(), ok = outcome.ok, elapsed_ms, "scenario finished");
    Ok(ScenarioReport {
        scenario: scenario.name(),
        ok: outcome.ok,
        result: outcome.result,
        error: outcome.error,
        elapsed_ms,
    })
}

fn name(event: &str) -> anyhow::Result<EventName> {
    Ok(EventName::new(event)?)
}

async fn greeting(tabs: u32, config: &RelayConfig) -> anyhow::Result<Outcome> {
    let ext = SimulatedExtension::boot(tabs, config).await?;
    let event = name("greeting")?;
    ext.background
        .handle(
            event.clone(),
            handler_fn(|who: String| async move { Ok::<_, Infallible>(format!("Hello, {who}!")) }),
        )
        .await?;

    let observed = ext.popup.invoke(&event, json!("World")).await;
    ext.shutdown().await;
    Ok(Outcome::expect_value(observed, &json!("Hello, World!")))
}

async fn count(tabs: u32, config: &RelayConfig) -> anyhow::Result<Outcome> {
    let ext = SimulatedExtension::boot(tabs, config).await?;
    let event = name("count")?;
    for (_, tab) in &ext.tabs {
        tab.handle_broadcast(
            event.clone(),
            handler_sync(|text: String| Ok::<_, Infallible>(text.chars().count())),
        )
        .await?;
    }

    let observed = ext.popup.broadcast(&event, json!("hi")).await;
    ext.shutdown().await;

    Ok(match observed {
        Ok(replies) => Outcome {
            ok: replies.len() == ext.tabs.len()
                && replies.iter().all(|r| r.data() == Some(&json!(2))),
            result: Some(Value::Array(replies.iter().map(reply_value).collect())),
            error: None,
        },
        Err(e) => Outcome::unexpected(&e),
    })
}

fn reply_value(reply: &BroadcastReply) -> Value {
    match reply {
        BroadcastReply::Data(data) => data.clone(),
        BroadcastReply::Error(error) => json!({ "error": error.message }),
    }
}

async fn throw_error(tabs: u32, config: &RelayConfig) -> anyhow::Result<Outcome> {
    let ext = SimulatedExtension::boot(tabs, config).await?;
    let event = name("throwError")?;
    ext.background
        .handle(event.clone(), handler_sync(|(): ()| Err::<Value, _>("boom")))
        .await?;

    let observed = ext.popup.invoke(&event, Value::Null).await;
    ext.shutdown().await;
    Ok(Outcome::expect_error(observed, ErrorKind::Remote, Some("boom")))
}

async fn direct(tabs: u32, config: &RelayConfig) -> anyhow::Result<Outcome> {
    let ext = SimulatedExtension::boot(tabs.max(1), config).await?;
    let (tab_id, tab) = match ext.tabs.first() {
        Some((tab_id, tab)) => (*tab_id, tab),
        None => bail!("direct scenario needs at least one tab"),
    };

    let ping = name("cs2bg:ping")?;
    ext.background
        .handle_direct(ping.clone(), handler_sync(|(): ()| Ok::<_, Infallible>("pong")))
        .await?;
    let title = name("bg2cs:title")?;
    tab.handle_direct(
        title.clone(),
        handler_sync(move |(): ()| Ok::<_, Infallible>(format!("tab {tab_id}"))),
    )
    .await?;

    let up = tab.dispatch_direct(&ping, Value::Null, None).await;
    let down = ext
        .background
        .dispatch_direct(&title, Value::Null, Some(tab_id))
        .await;
    ext.shutdown().await;

    let observed = match (up, down) {
        (Ok(up), Ok(down)) => Ok(json!({ "cs2bg": up, "bg2cs": down })),
        (Err(e), _) | (_, Err(e)) => Err(e),
    };
    Ok(Outcome::expect_value(
        observed,
        &json!({ "cs2bg": "pong", "bg2cs": format!("tab {tab_id}") }),
    ))
}

async fn ack_timeout(config: &RelayConfig) -> anyhow::Result<Outcome> {
    // No background attached, so nothing acknowledges.
    let runtime = InMemoryRuntime::with_max_message_bytes(EXTENSION_ID, config.max_message_bytes);
    let popup = RelayContext::start(
        runtime
            .attach(ContextKind::ExtensionPage {
                surface: Surface::Popup,
            })
            .await,
        config.clone(),
    )
    .await?;

    let observed = popup.invoke(&name("greeting")?, json!("World")).await;
    popup.shutdown().await;
    Ok(Outcome::expect_error(observed, ErrorKind::AckTimeout, None))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_all_expands_to_each_scenario() {
        assert_eq!(Scenario::All.expand(), Scenario::EACH.to_vec());
        assert_eq!(Scenario::Count.expand(), vec![Scenario::Count]);
    }

    #[tokio::test]
    async fn test_all_is_rejected_as_a_single_run() {
        let err = run(Scenario::All, 1, &RelayConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("'all' must be expanded"));
    }

    #[test]
    fn test_report_omits_absent_fields() {
        let report = ScenarioReport {
            scenario: "greeting",
            ok: true,
            result: Some(json!("Hello, World!")),
            error: None,
            elapsed_ms: 3,
        };
        let line = serde_json::to_value(&report).ok();
        assert_eq!(
            line,
            Some(json!({
                "scenario": "greeting",
                "ok": true,
                "result": "Hello, World!",
                "elapsed_ms": 3
            }))
        );
    }
}
