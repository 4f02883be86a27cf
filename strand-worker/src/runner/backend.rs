//! Runner bound to an execution backend
//!
//! Submits one [`JobSpec`] to the injected backend and answers the loop's
//! queries by polling it. Expected output files short-circuit the whole
//! thing: when they all exist the stage counts as done without ever being
//! submitted.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

use strand_backend::ExecutionBackend;
use strand_core::domain::backend::{BackendHandle, BackendStatus};
use strand_core::domain::spec::JobSpec;

use super::{OnDoneHook, Runner};

/// Runs one JobSpec on an execution backend
pub struct BackendRunner {
    spec: JobSpec,
    backend: Arc<dyn ExecutionBackend>,
    dependencies: Vec<Arc<dyn Runner>>,
    outputs: Vec<PathBuf>,
    hook: Option<Arc<dyn OnDoneHook>>,
    sweep_children: bool,

    started: AtomicBool,
    handle: OnceLock<BackendHandle>,
    submit_error: OnceLock<String>,
    done: AtomicBool,
    failed: AtomicBool,
    finished: AtomicBool,
    error_detail: OnceLock<String>,
}

impl BackendRunner {
    pub fn new(spec: JobSpec, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            spec,
            backend,
            dependencies: Vec::new(),
            outputs: Vec::new(),
            hook: None,
            sweep_children: false,
            started: AtomicBool::new(false),
            handle: OnceLock::new(),
            submit_error: OnceLock::new(),
            done: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            error_detail: OnceLock::new(),
        }
    }

    /// Adds an upstream Runner that must be finalized before this one is ready
    pub fn depends_on(mut self, runner: Arc<dyn Runner>) -> Self {
        self.dependencies.push(runner);
        self
    }

    /// Adds files whose joint presence marks this stage done
    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn OnDoneHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Also tear down backend jobs named `<name>-*` that the stage spawned
    /// itself on its own cloud
    pub fn sweep_children(mut self, sweep: bool) -> Self {
        self.sweep_children = sweep;
        self
    }

    fn outputs_present(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(|path| path.exists())
    }

    async fn poll(&self) -> Option<BackendStatus> {
        let handle = self.handle.get()?;
        let status = self.backend.poll_status(handle).await;
        debug!("Stage {} polled {}", self.name(), status);
        Some(status)
    }
}

#[async_trait]
impl Runner for BackendRunner {
    fn name(&self) -> &str {
        self.spec.name()
    }

    async fn is_ready(&self) -> bool {
        self.dependencies
            .iter()
            .all(|dependency| dependency.is_finished())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Stage {} was already started, not submitting again", self.name());
            return;
        }

        info!(
            "Submitting stage {} to {} (cloud {})",
            self.name(),
            self.backend.name(),
            self.spec.cloud()
        );

        match self.backend.submit(&self.spec).await {
            Ok(handle) => {
                let _ = self.handle.set(handle);
            }
            Err(e) => {
                error!("Failed to submit stage {}: {}", self.name(), e);
                let _ = self
                    .submit_error
                    .set(format!("failed to submit {}: {}", self.name(), e));
                self.failed.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn is_done(&self) -> bool {
        if self.done.load(Ordering::SeqCst) {
            return true;
        }

        if self.outputs_present() {
            if !self.is_started() {
                info!("Outputs of stage {} already exist, skipping submission", self.name());
            }
            self.done.store(true, Ordering::SeqCst);
            return true;
        }

        if self.poll().await == Some(BackendStatus::Complete) {
            self.done.store(true, Ordering::SeqCst);
            return true;
        }

        false
    }

    async fn is_failed(&self) -> bool {
        if self.failed.load(Ordering::SeqCst) {
            return true;
        }
        // a completed stage's record gets deleted, which later polls as failed
        if self.done.load(Ordering::SeqCst) {
            return false;
        }

        if self.poll().await == Some(BackendStatus::Failed) {
            self.failed.store(true, Ordering::SeqCst);
            return true;
        }

        false
    }

    async fn error_message(&self) -> Option<String> {
        if let Some(message) = self.submit_error.get() {
            return Some(message.clone());
        }

        let handle = self.handle.get()?;
        if let Some(detail) = self.error_detail.get() {
            return Some(detail.clone());
        }

        let detail = self.backend.fetch_error_detail(handle).await;
        Some(self.error_detail.get_or_init(|| detail).clone())
    }

    async fn on_done(&self) -> Result<()> {
        info!("Stage {} completed", self.name());

        let result = match &self.hook {
            Some(hook) => hook.on_stage_done(self.name(), &self.outputs).await,
            None => Ok(()),
        };

        if let Some(handle) = self.handle.get() {
            if let Err(e) = self.backend.delete(handle).await {
                warn!("Failed to clean up backend job {}: {}", handle, e);
            }
        }

        if result.is_ok() {
            self.finished.store(true, Ordering::SeqCst);
        }
        result
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    async fn delete_job_record(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(handle) = self.handle.get() {
            if let Err(e) = self.backend.delete(handle).await {
                errors.push(format!("{}: {}", handle.name(), e));
            }
        }

        if self.sweep_children {
            let prefix = format!("{}-", self.name());
            match self.backend.list_job_names(self.spec.cloud()).await {
                Ok(names) => {
                    for name in names.iter().filter(|name| name.starts_with(&prefix)) {
                        debug!("Sweeping child job {}", name);
                        let child = BackendHandle::new(name.as_str(), self.spec.cloud());
                        if let Err(e) = self.backend.delete(&child).await {
                            errors.push(format!("{}: {}", name, e));
                        }
                    }
                }
                Err(e) => errors.push(format!("listing jobs: {}", e)),
            }
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "failed to tear down stage {}: {}",
                self.name(),
                errors.join("; ")
            );
        }
        Ok(())
    }
}
