//! Queue poller
//!
//! Polls the gateway queue for new jobs and processes each one in its own
//! task. A semaphore caps how many jobs run at once; a job is only
//! dequeued once a permit is available, so nothing is taken off the queue
//! that this worker cannot start right away.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, error, info};

use strand_core::domain::job::JobRecord;

use crate::config::Config;
use crate::repository::JobQueue;
use crate::service::JobProcessor;

/// Poller that continuously dequeues and processes jobs
pub struct QueuePoller {
    config: Config,
    queue: Arc<dyn JobQueue>,
    processor: Arc<JobProcessor>,
    semaphore: Arc<Semaphore>,
}

impl QueuePoller {
    pub fn new(config: Config, queue: Arc<dyn JobQueue>, processor: Arc<JobProcessor>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            queue,
            processor,
            semaphore,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting queue poller (interval: {:?}, max parallel jobs: {})",
            self.config.poll_interval, self.config.max_parallel_jobs
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for queued jobs");

            match self.poll_once().await {
                Ok(spawned) => {
                    if spawned > 0 {
                        info!("Started {} job(s) this cycle", spawned);
                    }
                }
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                }
            }
        }
    }

    /// Dequeues jobs while capacity is left, returning how many were started
    pub async fn poll_once(&self) -> Result<usize> {
        let mut spawned = 0;

        loop {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max parallel jobs reached, leaving the rest queued");
                break;
            };

            let Some(job) = self
                .queue
                .dequeue()
                .await
                .context("Failed to dequeue job")?
            else {
                debug!("No jobs available");
                break;
            };

            self.spawn_job_task(job, permit);
            spawned += 1;
        }

        Ok(spawned)
    }

    /// Spawns a task processing one job; the permit is released when it ends
    fn spawn_job_task(&self, job: JobRecord, permit: OwnedSemaphorePermit) {
        let processor = Arc::clone(&self.processor);

        tokio::spawn(async move {
            let job_id = job.id;
            if let Err(e) = processor.process(job).await {
                error!("Failed to process job {}: {:#}", job_id, e);
            }
            drop(permit);
        });
    }
}
