//! RunSet orchestration loop
//!
//! Drives the Runners of one external request to completion with a single
//! cooperative polling loop. Each round checks, in priority order:
//!
//! 1. failures: any failed Runner tears the whole set down
//! 2. completions: done Runners get `on_done` and leave the set
//! 3. new work: Runners that are ready and not yet started are started
//!
//! A Runner becomes ready only after its upstream Runners went through
//! `on_done`, so work started in step 3 never races the completion pass.
//! When a deadline is configured it is checked before step 3. The loop
//! then sleeps for the poll interval. The loop ends when the set is empty
//! (success) or on the first failure.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::runner::Runner;

/// Timing of one RunSet loop
#[derive(Debug, Clone)]
pub struct RunSetConfig {
    /// Sleep between two rounds
    pub poll_interval: Duration,
    /// Fail the set when it runs longer than this
    pub deadline: Option<Duration>,
}

impl Default for RunSetConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            deadline: None,
        }
    }
}

/// Terminal state of a RunSet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed { error: String },
}

/// Ordered group of Runners making up one external request
pub struct RunSet {
    label: String,
    runners: Vec<Arc<dyn Runner>>,
    config: RunSetConfig,
}

impl RunSet {
    pub fn new(label: impl Into<String>, runners: Vec<Arc<dyn Runner>>, config: RunSetConfig) -> Self {
        Self {
            label: label.into(),
            runners,
            config,
        }
    }

    pub fn runners(&self) -> &[Arc<dyn Runner>] {
        &self.runners
    }

    /// Runs the loop until every Runner is done or one fails
    pub async fn run(self) -> RunOutcome {
        let started_at = Instant::now();
        let mut live: Vec<Arc<dyn Runner>> = self.runners.clone();

        info!("Running {} with {} stage(s)", self.label, live.len());

        loop {
            let mut errors = Vec::new();
            for runner in &live {
                if runner.is_failed().await {
                    let message = runner
                        .error_message()
                        .await
                        .unwrap_or_else(|| format!("{} failed", runner.name()));
                    error!("Stage {} failed: {}", runner.name(), message);
                    errors.push(message);
                }
            }
            if !errors.is_empty() {
                return self.fail(errors.join("; ")).await;
            }

            let mut remaining = Vec::with_capacity(live.len());
            for runner in live {
                if !runner.is_done().await {
                    remaining.push(runner);
                    continue;
                }
                if let Err(e) = runner.on_done().await {
                    error!("Stage {} could not be finalized: {:#}", runner.name(), e);
                    return self.fail(format!("{}: {:#}", runner.name(), e)).await;
                }
            }
            live = remaining;

            if live.is_empty() {
                info!("{} succeeded after {:?}", self.label, started_at.elapsed());
                return RunOutcome::Succeeded;
            }

            if let Some(deadline) = self.config.deadline {
                if started_at.elapsed() >= deadline {
                    for runner in &live {
                        warn!("Stage {} is {} at the deadline", runner.name(), runner.state().await);
                    }
                    return self
                        .fail(format!("deadline of {}s exceeded", deadline.as_secs()))
                        .await;
                }
            }

            for runner in &live {
                if !runner.is_started() && runner.is_ready().await {
                    runner.start().await;
                }
            }

            debug!("{}: {} stage(s) pending", self.label, live.len());
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Tears down every Runner of the set, including completed ones
    async fn fail(&self, error: String) -> RunOutcome {
        warn!("{} failed, tearing down {} stage(s)", self.label, self.runners.len());

        for runner in &self.runners {
            if let Err(e) = runner.delete_job_record().await {
                warn!("Teardown of stage {} failed: {:#}", runner.name(), e);
            }
        }

        RunOutcome::Failed { error }
    }
}
