//! Strand execution backends
//!
//! A uniform interface over the remote control planes that actually run
//! stage containers. The worker only ever talks to an [`ExecutionBackend`]
//! trait object; which implementation sits behind it is decided once, from
//! the JSON backend configuration, by [`connect`].
//!
//! # Example
//!
//! ```no_run
//! use strand_backend::{BackendConfig, HttpSettings, connect};
//! use strand_core::domain::spec::JobSpec;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BackendConfig::from_file("/etc/strand/backend.json")?;
//!     let backend = connect(config, &HttpSettings::default())?;
//!
//!     let spec = JobSpec::builder("strand-demo", "busybox:1.36", "echo hello").build()?;
//!     let handle = backend.submit(&spec).await?;
//!
//!     println!("Submitted {}", handle);
//!     Ok(())
//! }
//! ```

pub mod chronos;
pub mod config;
pub mod error;
pub mod kubernetes;
pub mod retry;

// Re-export commonly used types
pub use chronos::ChronosBackend;
pub use config::{BackendConfig, HttpSettings};
pub use error::{BackendError, Result};
pub use kubernetes::KubernetesBackend;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use strand_core::domain::backend::{BackendHandle, BackendStatus};
use strand_core::domain::spec::JobSpec;

/// A remote system able to run one container job to completion
///
/// Implementations retry transient control-plane failures internally (see
/// [`retry::send_with_retry`]). Status queries never fail: a control plane
/// that cannot be reached reports [`BackendStatus::Unknown`], which callers
/// treat as "still running".
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Creates the remote job
    ///
    /// Submitting a name that already exists adopts the existing job.
    async fn submit(&self, spec: &JobSpec) -> Result<BackendHandle>;

    /// Current state of a submitted job
    async fn poll_status(&self, handle: &BackendHandle) -> BackendStatus;

    /// Human-readable reason a job failed
    async fn fetch_error_detail(&self, handle: &BackendHandle) -> String;

    /// Removes the remote job and anything it spawned
    ///
    /// Deleting a job that no longer exists succeeds.
    async fn delete(&self, handle: &BackendHandle) -> Result<()>;

    /// Names of the jobs on one cloud, sorted
    async fn list_job_names(&self, cloud: &str) -> Result<Vec<String>>;

    /// Names of every job known to the backend, across all clouds, sorted
    async fn list_all_job_names(&self) -> Result<Vec<String>>;
}

/// Builds the backend described by `config`
///
/// The returned handle is meant to be created once per process and shared
/// by every RunSet.
pub fn connect(config: BackendConfig, settings: &HttpSettings) -> Result<Arc<dyn ExecutionBackend>> {
    let client = settings.build_client()?;

    let backend: Arc<dyn ExecutionBackend> = match config {
        BackendConfig::Kubernetes { clouds } => {
            Arc::new(KubernetesBackend::new(client, clouds, settings.retry))
        }
        BackendConfig::Chronos { clouds } => {
            Arc::new(ChronosBackend::new(client, clouds, settings.retry))
        }
    };

    info!("Using {} execution backend", backend.name());
    Ok(backend)
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;

    /// Serves `router` on an ephemeral local port, returning its base URL
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
