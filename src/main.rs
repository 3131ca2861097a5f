//! # Tabrelay - scenario runner
//!
//! Boots a simulated extension on the in-memory runtime and runs named relay
//! scenarios, printing one JSON report per line on stdout. Logs go to stderr.
//!
//! The process fails if any scenario's outcome differs from what it expects.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tabrelay::scenarios::{self, Scenario};
use tabrelay_core::RelayConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            tabs,
            config,
            log_level,
        } => {
            init_tracing(log_level.as_deref());

            let config = match config {
                Some(path) => RelayConfig::load(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?,
                None => RelayConfig::default(),
            };
            run(scenario, tabs, &config).await
        }
    }
}

async fn run(selection: Scenario, tabs: u32, config: &RelayConfig) -> Result<()> {
    info!(scenario = selection.name(), tabs, "running scenarios");

    let mut failed = Vec::new();
    for scenario in selection.expand() {
        let report = scenarios::run(scenario, tabs, config)
            .await
            .with_context(|| format!("Scenario '{}' could not be set up", scenario.name()))?;
        println!(
            "{}",
            serde_json::to_string(&report).context("Failed to encode scenario report")?
        );
        if !report.ok {
            warn!(scenario = scenario.name(), "unexpected outcome");
            failed.push(scenario.name());
        }
    }

    if !failed.is_empty() {
        bail!("Unexpected outcome in: {}", failed.join(", "));
    }
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
///
/// `--log-level` wins over `RUST_LOG`; the default is `info`.
fn init_tracing(level: Option<&str>) {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
