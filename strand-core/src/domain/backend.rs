//! Execution backend domain types

use serde::{Deserialize, Serialize};

/// Identifier of a job submitted to an execution backend
///
/// Job names are globally unique by construction, so the handle is the name
/// plus the cloud selector needed to reach the right control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendHandle {
    name: String,
    cloud: String,
}

impl BackendHandle {
    pub fn new(name: impl Into<String>, cloud: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cloud: cloud.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cloud(&self) -> &str {
        &self.cloud
    }
}

impl std::fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.cloud)
    }
}

/// Status of a submitted job as reported by its backend
///
/// `Unknown` means the backend could not be reached (or answered with
/// something unreadable). It is never treated as a failure of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendStatus {
    Running,
    Complete,
    Failed,
    Unknown,
}

impl BackendStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendStatus::Complete | BackendStatus::Failed)
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendStatus::Running => write!(f, "Running"),
            BackendStatus::Complete => write!(f, "Complete"),
            BackendStatus::Failed => write!(f, "Failed"),
            BackendStatus::Unknown => write!(f, "Unknown"),
        }
    }
}
