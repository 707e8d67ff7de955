//! AgentWeave - agent lifecycle, message routing and DAG workflow
//! orchestration.
//!
//! Main entry point for the AgentWeave CLI.

mod cli;
mod cmd_workflow;
mod echo;
mod logging;

use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tracing::{info, warn};

use agentweave_config::{ConfigLoader, ConfigValidator};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(cli.config.as_deref())?;
    let validation = ConfigValidator::validate(&config)?;
    if !validation.is_valid() {
        for error in &validation.errors {
            eprintln!("config error: {}: {}", error.path, error.message);
        }
        bail!("invalid configuration");
    }

    let _log_guard = logging::init_tracing(&config.logging)?;
    for warning in &validation.warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    info!("AgentWeave v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            definition,
            timeout_secs,
            json,
        } => {
            cmd_workflow::run(
                &config,
                &definition,
                Duration::from_secs(timeout_secs),
                json,
            )
            .await
        }
        Commands::Validate { definition } => cmd_workflow::validate(&definition).await,
    }
}
