//! Stage plan to RunSet translation
//!
//! Every stage of a job request becomes one [`BackendRunner`]. Backend job
//! names are derived from the request id so they are globally unique, and
//! dependencies are wired as direct references to the upstream Runners.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use strand_backend::ExecutionBackend;
use strand_core::domain::job::JobRecord;
use strand_core::domain::spec::{JobSpec, stage_name};

use crate::runner::{BackendRunner, OnDoneHook, Runner};
use crate::scheduler::{RunSet, RunSetConfig};
use crate::service::ArtifactManifestHook;

/// Builds RunSets from job requests
pub struct PipelineBuilder {
    backend: Arc<dyn ExecutionBackend>,
    work_root: PathBuf,
}

impl PipelineBuilder {
    pub fn new(backend: Arc<dyn ExecutionBackend>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            work_root: work_root.into(),
        }
    }

    /// Shared working directory of a job
    pub fn job_dir(&self, job: &JobRecord) -> PathBuf {
        self.work_root.join(job.id.to_string())
    }

    /// Creates the job's working directory and the Runners of its stages
    ///
    /// Fails without contacting the backend when a stage is invalid, two
    /// stages map to the same backend name, or a stage depends on one that
    /// is not listed before it.
    pub async fn build_run_set(&self, job: &JobRecord, config: RunSetConfig) -> Result<RunSet> {
        if job.stages.is_empty() {
            anyhow::bail!("job {} has no stages", job.id);
        }

        let job_dir = self.job_dir(job);
        tokio::fs::create_dir_all(&job_dir)
            .await
            .with_context(|| format!("Failed to create job directory {}", job_dir.display()))?;

        let prefix = format!("strand-{}", job.id);
        let hook: Arc<dyn OnDoneHook> = Arc::new(ArtifactManifestHook::new(&job_dir));

        let mut by_suffix: HashMap<&str, Arc<dyn Runner>> = HashMap::new();
        let mut names = HashSet::new();
        let mut runners = Vec::with_capacity(job.stages.len());

        for stage in &job.stages {
            let name = stage_name(&prefix, &stage.suffix)
                .with_context(|| format!("Invalid stage '{}'", stage.suffix))?;
            let spec = JobSpec::builder(name, &stage.image, &stage.command)
                .timeout(Duration::from_secs(stage.timeout_seconds))
                .resources(stage.resources)
                .cloud(&stage.cloud)
                .env("STRAND_JOB_ID", job.id.to_string())
                .env("STRAND_STAGE", &stage.suffix)
                .build()
                .with_context(|| format!("Invalid stage '{}'", stage.suffix))?;

            if !names.insert(spec.name().to_string()) {
                anyhow::bail!("stage '{}' maps to a duplicate job name {}", stage.suffix, spec.name());
            }

            let mut runner = BackendRunner::new(spec, Arc::clone(&self.backend))
                .with_outputs(stage.outputs.iter().map(|output| job_dir.join(output)))
                .with_hook(Arc::clone(&hook))
                .sweep_children(stage.sweep_children);

            for dependency in &stage.depends_on {
                let upstream = by_suffix.get(dependency.as_str()).with_context(|| {
                    format!(
                        "stage '{}' depends on '{}', which is not an earlier stage",
                        stage.suffix, dependency
                    )
                })?;
                runner = runner.depends_on(Arc::clone(upstream));
            }

            debug!("Planned stage {} ({} dependencies)", runner.name(), stage.depends_on.len());

            let runner: Arc<dyn Runner> = Arc::new(runner);
            by_suffix.insert(stage.suffix.as_str(), Arc::clone(&runner));
            runners.push(runner);
        }

        Ok(RunSet::new(format!("job {}", job.id), runners, config))
    }
}
