//! CLI definitions for AgentWeave.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// AgentWeave CLI.
#[derive(Parser)]
#[command(name = "agentweave")]
#[command(about = "Agent lifecycle, message routing and DAG workflow orchestration")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long, global = true, env = "AGENTWEAVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a workflow definition against built-in echo agents
    Run {
        /// Workflow definition (.toml or .json)
        definition: PathBuf,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,

        /// Print the final workflow as pretty JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a workflow definition and print its execution order
    Validate {
        /// Workflow definition (.toml or .json)
        definition: PathBuf,
    },
}
