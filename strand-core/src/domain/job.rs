//! Gateway job domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::spec::{DEFAULT_CLOUD, Resources};

/// One external analysis request as seen by the gateway
///
/// The gateway persists it; the worker dequeues it, runs its stages and
/// reports the final status back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stages: Vec<StagePlan>,
}

/// Status of an external request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Description of one pipeline stage of a request
///
/// Stages are listed in order; a stage may only depend on stages listed
/// before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePlan {
    /// Stage suffix appended to the job prefix (e.g. "prep", "compute")
    pub suffix: String,
    pub image: String,
    pub command: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    /// Paths relative to the job working directory whose presence marks the stage done
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Suffixes of earlier stages that must be done before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Also tear down backend jobs spawned by this stage (named `<stage>-*`)
    #[serde(default)]
    pub sweep_children: bool,
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_cloud() -> String {
    DEFAULT_CLOUD.to_string()
}
