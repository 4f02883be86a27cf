//! Jobs repository
//!
//! Handles communication with the gateway for job-related operations:
//! - Dequeuing the next job request
//! - Persisting job status updates

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use uuid::Uuid;

use strand_backend::RetryPolicy;
use strand_backend::retry::send_with_retry;
use strand_core::domain::job::JobRecord;
use strand_core::dto::job::{DequeueRequest, JobRecordUpdate};

/// Persists the status of external job requests
#[async_trait]
pub trait JobRecordRepository: Send + Sync {
    /// Records a status change of a job
    ///
    /// # Arguments
    /// * `job_id` - The ID of the job to update
    /// * `update` - The new status, with the error text when it failed
    async fn update_job_record(&self, job_id: Uuid, update: JobRecordUpdate) -> Result<()>;
}

/// Source of job requests to process
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Takes the next queued job, or `None` when the queue is empty
    async fn dequeue(&self) -> Result<Option<JobRecord>>;
}

/// HTTP implementation of both job traits against the gateway API
pub struct HttpJobRepository {
    client: Client,
    gateway_url: String,
    worker_id: String,
    retry: RetryPolicy,
}

impl HttpJobRepository {
    /// Creates a new HTTP job repository
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `gateway_url` - Base URL of the gateway (e.g., "http://localhost:8080")
    /// * `worker_id` - Unique identifier for this worker
    /// * `retry` - Retry policy for transient gateway errors
    pub fn new(client: Client, gateway_url: &str, worker_id: String, retry: RetryPolicy) -> Self {
        Self {
            client,
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            worker_id,
            retry,
        }
    }
}

async fn ensure_success(response: Response, action: &str) -> Result<Response> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Failed to {}: {} - {}", action, status, body);
    }
    Ok(response)
}

#[async_trait]
impl JobQueue for HttpJobRepository {
    async fn dequeue(&self) -> Result<Option<JobRecord>> {
        let url = format!("{}/api/jobs/dequeue", self.gateway_url);
        let request = DequeueRequest {
            worker_id: self.worker_id.clone(),
        };

        let response = send_with_retry(&self.retry, "dequeue job", || {
            self.client.post(&url).json(&request).send()
        })
        .await
        .context("Gateway unavailable while dequeuing")?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let job = ensure_success(response, "dequeue job")
            .await?
            .json::<JobRecord>()
            .await
            .context("Failed to parse dequeued job")?;

        Ok(Some(job))
    }
}

#[async_trait]
impl JobRecordRepository for HttpJobRepository {
    async fn update_job_record(&self, job_id: Uuid, update: JobRecordUpdate) -> Result<()> {
        let url = format!("{}/api/jobs/{}", self.gateway_url, job_id);
        let label = format!("update job {}", job_id);

        let response = send_with_retry(&self.retry, &label, || {
            self.client.put(&url).json(&update).send()
        })
        .await
        .with_context(|| format!("Gateway unavailable while marking job {} {}", job_id, update.status))?;

        ensure_success(response, "update job status").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct MockGateway {
        queue: Arc<Mutex<VecDeque<serde_json::Value>>>,
        workers: Arc<Mutex<Vec<String>>>,
        updates: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    }

    async fn dequeue(
        State(gateway): State<MockGateway>,
        Json(request): Json<serde_json::Value>,
    ) -> axum::response::Response {
        use axum::response::IntoResponse;

        gateway
            .workers
            .lock()
            .unwrap()
            .push(request["worker_id"].as_str().unwrap_or_default().to_string());

        let next = gateway.queue.lock().unwrap().pop_front();
        match next {
            Some(job) => Json(job).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        }
    }

    async fn update(
        State(gateway): State<MockGateway>,
        Path(id): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        if id == "00000000-0000-0000-0000-000000000000" {
            return StatusCode::NOT_FOUND;
        }
        gateway.updates.lock().unwrap().push((id, body));
        StatusCode::NO_CONTENT
    }

    async fn repository(gateway: MockGateway) -> HttpJobRepository {
        let app = Router::new()
            .route("/api/jobs/dequeue", post(dequeue))
            .route("/api/jobs/{id}", put(update))
            .with_state(gateway);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        HttpJobRepository::new(
            Client::new(),
            &url,
            "worker-1".to_string(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_dequeue() {
        let id = Uuid::new_v4();
        let gateway = MockGateway::default();
        gateway.queue.lock().unwrap().push_back(serde_json::json!({
            "id": id,
            "status": "queued",
            "requested_at": "2026-01-12T10:00:00Z",
            "stages": [{ "suffix": "prep", "image": "busybox", "command": "true" }]
        }));
        let repository = repository(gateway.clone()).await;

        let job = repository.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.stages.len(), 1);

        assert!(repository.dequeue().await.unwrap().is_none());
        assert_eq!(*gateway.workers.lock().unwrap(), vec!["worker-1", "worker-1"]);
    }

    #[tokio::test]
    async fn test_update_job_record() {
        let id = Uuid::new_v4();
        let gateway = MockGateway::default();
        let repository = repository(gateway.clone()).await;

        repository
            .update_job_record(id, JobRecordUpdate::failed("prep: exit code 1"))
            .await
            .unwrap();

        let updates = gateway.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, id.to_string());
        assert_eq!(
            updates[0].1,
            serde_json::json!({ "status": "failed", "error": "prep: exit code 1" })
        );
    }

    #[tokio::test]
    async fn test_update_unknown_job_is_an_error() {
        let repository = repository(MockGateway::default()).await;

        let result = repository
            .update_job_record(Uuid::nil(), JobRecordUpdate::running())
            .await;

        assert!(result.unwrap_err().to_string().contains("404"));
    }
}
