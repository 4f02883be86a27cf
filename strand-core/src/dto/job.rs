//! Job DTOs for gateway communication

use serde::{Deserialize, Serialize};

use crate::domain::job::JobStatus;

/// Status transition written to the gateway's job record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecordUpdate {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecordUpdate {
    pub fn running() -> Self {
        Self {
            status: JobStatus::Running,
            error: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Request sent by a worker to take the next queued job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DequeueRequest {
    pub worker_id: String,
}
