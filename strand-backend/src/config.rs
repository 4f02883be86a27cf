//! Backend connection configuration
//!
//! A backend is configured by a JSON document naming its kind and, for
//! every cloud selector, the connection parameters of the control plane
//! serving it:
//!
//! ```json
//! {
//!   "kind": "kubernetes",
//!   "clouds": {
//!     "default": { "api_url": "https://10.0.0.1:6443", "namespace": "pipelines" }
//!   }
//! }
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::error::{BackendError, Result};
use crate::retry::RetryPolicy;

/// Which backend to run against, with its per-cloud connection table
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Kubernetes { clouds: HashMap<String, ClusterConfig> },
    Chronos { clouds: HashMap<String, ChronosEndpoint> },
}

impl BackendConfig {
    /// Parses a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BackendError::Config(format!("failed to parse backend config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BackendError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Name of the configured backend kind
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Kubernetes { .. } => "kubernetes",
            BackendConfig::Chronos { .. } => "chronos",
        }
    }

    fn validate(&self) -> Result<()> {
        let urls: Vec<(&String, &String)> = match self {
            BackendConfig::Kubernetes { clouds } => {
                clouds.iter().map(|(cloud, c)| (cloud, &c.api_url)).collect()
            }
            BackendConfig::Chronos { clouds } => {
                clouds.iter().map(|(cloud, c)| (cloud, &c.url)).collect()
            }
        };

        if urls.is_empty() {
            return Err(BackendError::Config("no clouds configured".to_string()));
        }

        for (cloud, url) in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(BackendError::Config(format!(
                    "url for cloud '{}' must start with http:// or https://",
                    cloud
                )));
            }
        }

        Ok(())
    }
}

/// Connection parameters of one Kubernetes cluster
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// API server base URL
    pub api_url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Bearer token of the service account submitting jobs
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Raw toleration objects copied into every pod spec
    #[serde(default)]
    pub tolerations: Vec<serde_json::Value>,
    /// Shared job storage mounted into every container
    #[serde(default)]
    pub volume: Option<ClaimVolume>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Persistent volume claim holding the shared job working directories
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimVolume {
    pub claim_name: String,
    pub mount_path: String,
}

/// Connection parameters of one Chronos scheduler
#[derive(Debug, Clone, Deserialize)]
pub struct ChronosEndpoint {
    /// Scheduler base URL
    pub url: String,
    #[serde(default)]
    pub volume: Option<HostVolume>,
}

/// Host directory bind-mounted into Chronos containers
#[derive(Debug, Clone, Deserialize)]
pub struct HostVolume {
    pub host_path: String,
    pub container_path: String,
}

/// HTTP client settings shared by every backend
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl HttpSettings {
    /// Builds the pooled HTTP client shared by all RunSets of the process
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(BackendError::from)
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}
