//! Strand CLI
//!
//! Operator command-line interface talking straight to an execution
//! backend: inspect, list and delete the remote jobs the workers create.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Strand execution backend CLI", long_about = None)]
struct Cli {
    /// Backend configuration file (JSON)
    #[arg(
        long,
        env = "STRAND_BACKEND_CONFIG",
        default_value = "/etc/strand/backend.json"
    )]
    backend_config: PathBuf,

    /// Cloud selector used to reach the backend
    #[arg(long, env = "STRAND_CLOUD", default_value = "default")]
    cloud: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        backend_config: cli.backend_config,
        cloud: cli.cloud,
    };

    handle_command(cli.command, &config).await
}
