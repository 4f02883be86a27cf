//! Stage artifact manifests
//!
//! When a stage completes, a small JSON manifest listing its outputs is
//! written under `<job dir>/.strand/<stage>.json`, so the gateway can serve
//! results without walking the shared storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::runner::OnDoneHook;

const MANIFEST_DIR: &str = ".strand";

/// Writes a manifest of each completed stage's outputs
pub struct ArtifactManifestHook {
    job_dir: PathBuf,
}

impl ArtifactManifestHook {
    pub fn new(job_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_dir: job_dir.into(),
        }
    }

    /// Path of the manifest written for `stage`
    pub fn manifest_path(&self, stage: &str) -> PathBuf {
        self.job_dir.join(MANIFEST_DIR).join(format!("{}.json", stage))
    }

    async fn describe(&self, path: &Path) -> Result<ArtifactEntry> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Expected output {} is missing", path.display()))?;

        let relative = path.strip_prefix(&self.job_dir).unwrap_or(path);
        Ok(ArtifactEntry {
            path: relative.display().to_string(),
            bytes: metadata.len(),
        })
    }
}

#[derive(Debug, Serialize)]
struct StageManifest {
    stage: String,
    completed_at: DateTime<Utc>,
    outputs: Vec<ArtifactEntry>,
}

#[derive(Debug, Serialize)]
struct ArtifactEntry {
    path: String,
    bytes: u64,
}

#[async_trait]
impl OnDoneHook for ArtifactManifestHook {
    async fn on_stage_done(&self, stage: &str, outputs: &[PathBuf]) -> Result<()> {
        let mut entries = Vec::with_capacity(outputs.len());
        for output in outputs {
            entries.push(self.describe(output).await?);
        }

        let manifest = StageManifest {
            stage: stage.to_string(),
            completed_at: Utc::now(),
            outputs: entries,
        };

        let path = self.manifest_path(stage);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Wrote manifest {}", path.display());
        Ok(())
    }
}
