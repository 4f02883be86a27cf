//! Strand Worker
//!
//! A long-running worker that turns queued analysis requests into chains
//! of remote container jobs.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: HTTP communication with the gateway (queue, job status)
//! - Runners: One backend job per pipeline stage, with readiness and completion checks
//! - Scheduler: Queue polling and the per-job RunSet loop
//! - Services: Stage plan translation, result capture, job processing
//!
//! The worker dequeues jobs from the gateway, submits their stages to the
//! configured execution backend, polls them to completion and reports the
//! final status back.

mod config;
mod repository;
mod runner;
mod scheduler;
mod service;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::HttpJobRepository;
use crate::scheduler::QueuePoller;
use crate::service::{JobProcessor, PipelineBuilder};
use strand_backend::BackendConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strand_worker=info,strand_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Strand Worker");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: worker_id={}, gateway_url={}",
        config.worker_id, config.gateway_url
    );

    // Connect the execution backend, shared by every job this process runs
    let backend_config = BackendConfig::from_file(&config.backend_config).with_context(|| {
        format!(
            "Failed to load backend config from {}",
            config.backend_config.display()
        )
    })?;
    let settings = config.http_settings();
    let backend = strand_backend::connect(backend_config, &settings)
        .context("Failed to initialize execution backend")?;

    // Gateway client
    let client = settings
        .build_client()
        .context("Failed to build gateway HTTP client")?;
    let repository = Arc::new(HttpJobRepository::new(
        client,
        &config.gateway_url,
        config.worker_id.clone(),
        config.retry,
    ));

    let processor = Arc::new(JobProcessor::new(
        repository.clone(),
        PipelineBuilder::new(backend, config.work_root.clone()),
        config.run_set_config(),
    ));

    info!("Worker initialized successfully");
    info!(
        "Poll interval: {:?}, run poll interval: {:?}, run deadline: {:?}",
        config.poll_interval, config.run_poll_interval, config.run_deadline
    );

    let poller = QueuePoller::new(config, repository, processor);

    info!("Starting queue polling loop");
    if let Err(e) = poller.run().await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            warn!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
