//! Job processor
//!
//! Takes one dequeued job request from start to finish: marks it running,
//! builds and runs its RunSet, and records the outcome. The status hook is
//! called exactly twice per job.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use strand_core::domain::job::JobRecord;
use strand_core::dto::job::JobRecordUpdate;

use crate::repository::JobRecordRepository;
use crate::scheduler::{RunOutcome, RunSetConfig};
use crate::service::PipelineBuilder;

/// Processes job requests end to end
pub struct JobProcessor {
    records: Arc<dyn JobRecordRepository>,
    pipeline: PipelineBuilder,
    run_config: RunSetConfig,
}

impl JobProcessor {
    pub fn new(
        records: Arc<dyn JobRecordRepository>,
        pipeline: PipelineBuilder,
        run_config: RunSetConfig,
    ) -> Self {
        Self {
            records,
            pipeline,
            run_config,
        }
    }

    /// Runs a job and reports its final status
    ///
    /// Errors only when the status hook itself fails; job failures are
    /// reported through the returned outcome.
    pub async fn process(&self, job: JobRecord) -> Result<RunOutcome> {
        info!("Processing job {} ({} stage(s))", job.id, job.stages.len());

        self.records
            .update_job_record(job.id, JobRecordUpdate::running())
            .await
            .with_context(|| format!("Failed to mark job {} running", job.id))?;

        let outcome = match self
            .pipeline
            .build_run_set(&job, self.run_config.clone())
            .await
        {
            Ok(run_set) => run_set.run().await,
            Err(e) => {
                error!("Job {} has an invalid stage plan: {:#}", job.id, e);
                RunOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        };

        let update = match &outcome {
            RunOutcome::Succeeded => {
                info!("Job {} completed", job.id);
                JobRecordUpdate::completed()
            }
            RunOutcome::Failed { error } => {
                error!("Job {} failed: {}", job.id, error);
                JobRecordUpdate::failed(error.clone())
            }
        };

        self.records
            .update_job_record(job.id, update)
            .await
            .with_context(|| format!("Failed to record outcome of job {}", job.id))?;

        Ok(outcome)
    }
}
