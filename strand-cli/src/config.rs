//! Configuration module
//!
//! Handles CLI configuration: which backend to talk to and through which cloud.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use strand_backend::{BackendConfig, ExecutionBackend, HttpSettings};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend configuration file
    pub backend_config: PathBuf,
    /// Cloud selector used for every command
    pub cloud: String,
}

impl Config {
    /// Loads the backend configuration and connects to it
    pub fn connect(&self) -> Result<Arc<dyn ExecutionBackend>> {
        let backend = BackendConfig::from_file(&self.backend_config).with_context(|| {
            format!(
                "Failed to load backend config from {}",
                self.backend_config.display()
            )
        })?;

        strand_backend::connect(backend, &HttpSettings::default())
            .context("Failed to initialize execution backend")
    }
}
