//! sandfleet entry point.
//!
//! Logs go to stderr; results (summaries, JSON) go to stdout.

mod cli;
mod commands;
mod config;

use clap::Parser;
use cli::{Cli, Command};
use config::CliConfig;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Engine-level events are re-reported as progress by the CLI.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sandfleet=info,sandfleet_core=warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = CliConfig::from_env();
    tracing::debug!(?config, "Configuration loaded");

    match cli.command {
        Command::Provision(args) => commands::provision(args, &config).await,
        Command::List { prefix, json } => commands::list(&prefix, json, &config).await,
        Command::Destroy { prefix } => commands::destroy(&prefix, &config).await,
    }
}
