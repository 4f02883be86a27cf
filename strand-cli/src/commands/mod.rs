//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the status of a backend job
    Status {
        /// Backend job name
        name: String,
    },
    /// Show why a backend job failed, with the tail of its log when available
    Logs {
        /// Backend job name
        name: String,
    },
    /// List backend jobs
    List {
        /// Only show jobs whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete a backend job
    Delete {
        /// Backend job name
        name: String,
    },
    /// Delete every job on the selected cloud whose name starts with a prefix
    Sweep {
        /// Name prefix, e.g. the prefix of one request's stages
        prefix: String,

        /// Only print what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

/// Handle a CLI command
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let backend = config.connect()?;

    match command {
        Commands::Status { name } => job::show_status(backend.as_ref(), config, &name).await,
        Commands::Logs { name } => job::show_logs(backend.as_ref(), config, &name).await,
        Commands::List { prefix } => job::list_jobs(backend.as_ref(), prefix.as_deref()).await,
        Commands::Delete { name } => job::delete_job(backend.as_ref(), config, &name).await,
        Commands::Sweep { prefix, dry_run } => {
            job::sweep_jobs(backend.as_ref(), config, &prefix, dry_run).await
        }
    }
}
