//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tabrelay::scenarios::Scenario;

/// Tabrelay - cross-context relay for browser extensions
#[derive(Parser, Debug)]
#[command(name = "tabrelay")]
#[command(version)]
#[command(about = "Run relay scenarios on a simulated browser extension")]
#[command(
    long_about = "Tabrelay boots a background context, a popup and one content script per tab on an in-memory runtime, runs the chosen scenarios and prints one JSON result per line."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a named scenario
    Run {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,

        /// Number of simulated tabs
        #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=64))]
        tabs: u32,

        /// TOML configuration file (defaults when absent)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Log filter, overrides RUST_LOG (e.g. debug, tabrelay_messaging=trace)
        #[arg(short, long)]
        log_level: Option<String>,
    },
}
