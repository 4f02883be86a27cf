//! Job command handlers
//!
//! Inspect and remove backend jobs. `delete` and `sweep` are how an
//! operator cancels a running request: the worker sees the deleted stage
//! as failed on its next poll and tears the rest down.

use anyhow::Result;
use colored::*;

use strand_backend::ExecutionBackend;
use strand_core::domain::backend::{BackendHandle, BackendStatus};

use crate::config::Config;

/// Show the status of one job
pub async fn show_status(backend: &dyn ExecutionBackend, config: &Config, name: &str) -> Result<()> {
    let handle = BackendHandle::new(name, config.cloud.as_str());
    let status = backend.poll_status(&handle).await;

    println!("{}", "Job Details:".bold());
    println!("  Name:    {}", name.cyan());
    println!("  Cloud:   {}", handle.cloud().dimmed());
    println!("  Backend: {}", backend.name().dimmed());
    println!("  Status:  {}", colorize_status(status));

    if status == BackendStatus::Unknown {
        println!();
        println!("{}", "⚠ Backend unreachable, status unknown".yellow());
    }

    Ok(())
}

/// Show the failure detail of one job
pub async fn show_logs(backend: &dyn ExecutionBackend, config: &Config, name: &str) -> Result<()> {
    let handle = BackendHandle::new(name, config.cloud.as_str());
    let detail = backend.fetch_error_detail(&handle).await;

    println!("{}", format!("Failure detail for {}:", name).bold());
    println!("{}", "─".repeat(80).dimmed());
    println!("{}", detail);
    println!("{}", "─".repeat(80).dimmed());

    Ok(())
}

/// List jobs, optionally filtered by name prefix
pub async fn list_jobs(backend: &dyn ExecutionBackend, prefix: Option<&str>) -> Result<()> {
    let names = backend.list_all_job_names().await?;
    let names = match prefix {
        Some(prefix) => matching_names(&names, prefix),
        None => names,
    };

    if names.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", names.len()).bold());
        println!();
        for name in names {
            println!("  {} {}", "▸".cyan(), name);
        }
    }

    Ok(())
}

/// Delete one job
pub async fn delete_job(backend: &dyn ExecutionBackend, config: &Config, name: &str) -> Result<()> {
    let handle = BackendHandle::new(name, config.cloud.as_str());
    backend.delete(&handle).await?;

    println!("{} Deleted {}", "✓".green(), name);
    Ok(())
}

/// Delete every job on the selected cloud whose name starts with `prefix`
pub async fn sweep_jobs(
    backend: &dyn ExecutionBackend,
    config: &Config,
    prefix: &str,
    dry_run: bool,
) -> Result<()> {
    if prefix.trim().is_empty() {
        anyhow::bail!("refusing to sweep with an empty prefix");
    }

    let names = matching_names(&backend.list_job_names(&config.cloud).await?, prefix);
    if names.is_empty() {
        println!("{}", format!("No jobs match '{}'.", prefix).yellow());
        return Ok(());
    }

    if dry_run {
        println!("{}", format!("Would delete {} job(s):", names.len()).bold());
        for name in &names {
            println!("  {} {}", "▸".cyan(), name);
        }
        return Ok(());
    }

    let mut failures = 0;
    for name in &names {
        let handle = BackendHandle::new(name.as_str(), config.cloud.as_str());
        match backend.delete(&handle).await {
            Ok(()) => println!("{} Deleted {}", "✓".green(), name),
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", "✗".red(), name, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} job(s) could not be deleted", failures, names.len());
    }
    Ok(())
}

fn matching_names(names: &[String], prefix: &str) -> Vec<String> {
    names
        .iter()
        .filter(|name| name.starts_with(prefix))
        .cloned()
        .collect()
}

/// Colorize backend status for display
fn colorize_status(status: BackendStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        BackendStatus::Running => status_str.cyan(),
        BackendStatus::Complete => status_str.green(),
        BackendStatus::Failed => status_str.red(),
        BackendStatus::Unknown => status_str.yellow(),
    }
}
