//! Chronos execution backend
//!
//! The legacy scheduler. Jobs are registered as one-shot ISO-8601 jobs
//! (`R1//...`), run as Docker containers, and tracked through the
//! scheduler's success/error counters. Chronos has no per-job deadline, so
//! the command is wrapped in `timeout`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use strand_core::domain::backend::{BackendHandle, BackendStatus};
use strand_core::domain::spec::JobSpec;

use crate::ExecutionBackend;
use crate::config::ChronosEndpoint;
use crate::error::{BackendError, Result, ensure_success};
use crate::retry::{RetryPolicy, send_with_retry};

/// Execution backend backed by a Chronos scheduler
pub struct ChronosBackend {
    client: Client,
    endpoints: HashMap<String, ChronosEndpoint>,
    retry: RetryPolicy,
}

impl ChronosBackend {
    /// Creates a backend over the given schedulers, keyed by cloud selector
    pub fn new(
        client: Client,
        endpoints: HashMap<String, ChronosEndpoint>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            endpoints,
            retry,
        }
    }

    fn endpoint(&self, cloud: &str) -> Result<&ChronosEndpoint> {
        self.endpoints
            .get(cloud)
            .ok_or_else(|| BackendError::UnknownCloud(cloud.to_string()))
    }

    fn url(endpoint: &ChronosEndpoint, path: &str) -> String {
        format!("{}/v1/scheduler{}", endpoint.url.trim_end_matches('/'), path)
    }

    /// Looks a job up by exact name; `Ok(None)` when the scheduler does not know it
    async fn find_job(&self, endpoint: &ChronosEndpoint, name: &str) -> Result<Option<ChronosJob>> {
        let url = Self::url(endpoint, "/jobs/search");
        let label = format!("search job {}", name);

        let response = send_with_retry(&self.retry, &label, || {
            self.client.get(&url).query(&[("name", name)]).send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        let jobs = ensure_success(response)
            .await?
            .json::<Vec<ChronosJob>>()
            .await
            .map_err(|e| BackendError::ParseError(format!("job search {}: {}", name, e)))?;

        // search matches substrings
        Ok(jobs.into_iter().find(|job| job.name == name))
    }
}

#[async_trait]
impl ExecutionBackend for ChronosBackend {
    fn name(&self) -> &'static str {
        "chronos"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<BackendHandle> {
        let endpoint = self.endpoint(spec.cloud())?;
        let url = Self::url(endpoint, "/iso8601");
        let document = job_document(spec, endpoint);
        let label = format!("register job {}", spec.name());

        let response = send_with_retry(&self.retry, &label, || {
            self.client.post(&url).json(&document).send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        ensure_success(response).await?;

        info!("Registered Chronos job {}", spec.name());
        Ok(BackendHandle::new(spec.name(), spec.cloud()))
    }

    async fn poll_status(&self, handle: &BackendHandle) -> BackendStatus {
        let endpoint = match self.endpoint(handle.cloud()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("Cannot poll {}: {}", handle, e);
                return BackendStatus::Unknown;
            }
        };

        match self.find_job(endpoint, handle.name()).await {
            Ok(Some(job)) => {
                let status = job.status();
                debug!("Job {} is {}", handle.name(), status);
                status
            }
            Ok(None) => {
                warn!("Job {} no longer exists on the scheduler", handle.name());
                BackendStatus::Failed
            }
            Err(e) => {
                warn!("Failed to poll job {}: {}", handle.name(), e);
                BackendStatus::Unknown
            }
        }
    }

    async fn fetch_error_detail(&self, handle: &BackendHandle) -> String {
        let endpoint = match self.endpoint(handle.cloud()) {
            Ok(endpoint) => endpoint,
            Err(e) => return e.to_string(),
        };

        match self.find_job(endpoint, handle.name()).await {
            Ok(Some(job)) => {
                let last_error = job.last_error.as_deref().filter(|s| !s.is_empty());
                match last_error {
                    Some(at) => format!(
                        "job {} failed {} time(s), last error at {}",
                        job.name, job.error_count, at
                    ),
                    None => format!("job {} failed {} time(s)", job.name, job.error_count),
                }
            }
            Ok(None) => format!("job {} no longer exists on the scheduler", handle.name()),
            Err(e) => format!("job {} failed (status unavailable: {})", handle.name(), e),
        }
    }

    async fn delete(&self, handle: &BackendHandle) -> Result<()> {
        let endpoint = self.endpoint(handle.cloud())?;
        let url = Self::url(endpoint, &format!("/job/{}", handle.name()));
        let label = format!("delete job {}", handle.name());

        let response = send_with_retry(&self.retry, &label, || self.client.delete(&url).send())
            .await
            .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Job {} was already deleted", handle.name());
            return Ok(());
        }
        ensure_success(response).await?;

        info!("Deleted Chronos job {}", handle.name());
        Ok(())
    }

    async fn list_job_names(&self, cloud: &str) -> Result<Vec<String>> {
        let url = Self::url(self.endpoint(cloud)?, "/jobs");
        let label = format!("list jobs on {}", cloud);

        let response = send_with_retry(&self.retry, &label, || self.client.get(&url).send())
            .await
            .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        let jobs = ensure_success(response)
            .await?
            .json::<Vec<ChronosJob>>()
            .await
            .map_err(|e| BackendError::ParseError(format!("job list: {}", e)))?;

        let names: BTreeSet<String> = jobs.into_iter().map(|job| job.name).collect();
        Ok(names.into_iter().collect())
    }

    async fn list_all_job_names(&self) -> Result<Vec<String>> {
        let mut clouds: Vec<&String> = self.endpoints.keys().collect();
        clouds.sort();

        let mut names = BTreeSet::new();
        for cloud in clouds {
            names.extend(self.list_job_names(cloud).await?);
        }

        Ok(names.into_iter().collect())
    }
}

/// Builds the one-shot Chronos job document for a spec
pub(crate) fn job_document(spec: &JobSpec, endpoint: &ChronosEndpoint) -> Value {
    let resources = spec.resources();
    let env: Vec<Value> = spec
        .env()
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let volumes: Vec<Value> = endpoint
        .volume
        .iter()
        .map(|v| json!({ "hostPath": v.host_path, "containerPath": v.container_path, "mode": "RW" }))
        .collect();

    json!({
        "name": spec.name(),
        "command": format!(
            "timeout {} /bin/sh -c {}",
            spec.timeout().as_secs(),
            shell_quote(spec.command())
        ),
        "shell": true,
        "schedule": "R1//PT24H",
        "retries": 0,
        "async": false,
        "owner": "",
        "cpus": resources.cpu_limit,
        "mem": resources.memory_limit_mb,
        "environmentVariables": env,
        "container": {
            "type": "DOCKER",
            "image": spec.image(),
            "network": "BRIDGE",
            "volumes": volumes,
        },
    })
}

/// Quotes a string for `/bin/sh`
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChronosJob {
    name: String,
    #[serde(default)]
    success_count: u64,
    #[serde(default)]
    error_count: u64,
    #[serde(default)]
    last_error: Option<String>,
}

impl ChronosJob {
    fn status(&self) -> BackendStatus {
        if self.error_count > 0 {
            BackendStatus::Failed
        } else if self.success_count > 0 {
            BackendStatus::Complete
        } else {
            BackendStatus::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostVolume;
    use crate::test_support::serve;
    use axum::extract::{Path, Query, State};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use strand_core::domain::spec::Resources;

    /// In-memory scheduler keyed by job name
    #[derive(Clone, Default)]
    struct MockChronos {
        jobs: Arc<Mutex<BTreeMap<String, Value>>>,
    }

    impl MockChronos {
        fn with_job(self, job: Value) -> Self {
            let name = job["name"].as_str().unwrap().to_string();
            self.jobs.lock().unwrap().insert(name, job);
            self
        }

        fn router(self) -> Router {
            Router::new()
                .route("/v1/scheduler/iso8601", post(register))
                .route("/v1/scheduler/jobs", get(list))
                .route("/v1/scheduler/jobs/search", get(search))
                .route("/v1/scheduler/job/{name}", delete(remove))
                .with_state(self)
        }
    }

    async fn register(State(mock): State<MockChronos>, Json(job): Json<Value>) -> StatusCode {
        let name = job["name"].as_str().unwrap_or_default().to_string();
        mock.jobs.lock().unwrap().insert(name, job);
        StatusCode::NO_CONTENT
    }

    async fn list(State(mock): State<MockChronos>) -> Json<Vec<Value>> {
        Json(mock.jobs.lock().unwrap().values().cloned().collect())
    }

    async fn search(
        State(mock): State<MockChronos>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Vec<Value>> {
        let needle = query.get("name").cloned().unwrap_or_default();
        let found = mock
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.contains(&needle))
            .map(|(_, job)| job.clone())
            .collect();
        Json(found)
    }

    async fn remove(State(mock): State<MockChronos>, Path(name): Path<String>) -> StatusCode {
        match mock.jobs.lock().unwrap().remove(&name) {
            Some(_) => StatusCode::NO_CONTENT,
            None => StatusCode::NOT_FOUND,
        }
    }

    fn endpoint(url: &str) -> ChronosEndpoint {
        ChronosEndpoint {
            url: url.to_string(),
            volume: Some(HostVolume {
                host_path: "/srv/jobs".to_string(),
                container_path: "/jobs".to_string(),
            }),
        }
    }

    async fn backend_for(mock: MockChronos) -> ChronosBackend {
        let url = serve(mock.router()).await;
        ChronosBackend::new(
            Client::new(),
            HashMap::from([("default".to_string(), endpoint(&url))]),
            RetryPolicy::new(2, Duration::from_millis(1)),
        )
    }

    fn spec(name: &str) -> JobSpec {
        JobSpec::builder(name, "busybox:1.36", "echo 'hello' > /jobs/out.txt")
            .timeout(Duration::from_secs(120))
            .resources(Resources::new(1.0, 2.0, 256, 1024))
            .build()
            .unwrap()
    }

    fn handle(name: &str) -> BackendHandle {
        BackendHandle::new(name, "default")
    }

    #[test]
    fn test_job_document() {
        let document = job_document(&spec("job-prep"), &endpoint("http://chronos"));

        assert_eq!(document["name"], "job-prep");
        assert_eq!(document["schedule"], "R1//PT24H");
        assert_eq!(document["retries"], 0);
        assert_eq!(document["cpus"], 2.0);
        assert_eq!(document["mem"], 1024);
        assert_eq!(document["container"]["image"], "busybox:1.36");
        assert_eq!(document["container"]["volumes"][0]["containerPath"], "/jobs");
        assert_eq!(
            document["command"],
            r#"timeout 120 /bin/sh -c 'echo '\''hello'\'' > /jobs/out.txt'"#
        );
    }

    #[tokio::test]
    async fn test_submit_then_poll() {
        let mock = MockChronos::default();
        let backend = backend_for(mock.clone()).await;

        let handle = backend.submit(&spec("job-prep")).await.unwrap();
        assert_eq!(handle.name(), "job-prep");
        assert_eq!(backend.poll_status(&handle).await, BackendStatus::Running);

        mock.jobs.lock().unwrap().get_mut("job-prep").unwrap()["successCount"] = json!(1);
        assert_eq!(backend.poll_status(&handle).await, BackendStatus::Complete);
    }

    #[tokio::test]
    async fn test_poll_matches_exact_name() {
        let mock = MockChronos::default()
            .with_job(json!({ "name": "job-prep-extra", "errorCount": 3 }))
            .with_job(json!({ "name": "job-prep", "successCount": 0 }));
        let backend = backend_for(mock).await;

        assert_eq!(backend.poll_status(&handle("job-prep")).await, BackendStatus::Running);
        assert_eq!(backend.poll_status(&handle("job-missing")).await, BackendStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_job_detail() {
        let mock = MockChronos::default().with_job(json!({
            "name": "job-prep",
            "errorCount": 1,
            "lastError": "2026-01-12T10:00:00.000Z"
        }));
        let backend = backend_for(mock).await;

        assert_eq!(backend.poll_status(&handle("job-prep")).await, BackendStatus::Failed);
        assert_eq!(
            backend.fetch_error_detail(&handle("job-prep")).await,
            "job job-prep failed 1 time(s), last error at 2026-01-12T10:00:00.000Z"
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let mock = MockChronos::default().with_job(json!({ "name": "job-prep" }));
        let backend = backend_for(mock.clone()).await;

        backend.delete(&handle("job-prep")).await.unwrap();
        backend.delete(&handle("job-prep")).await.unwrap();

        assert!(mock.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_all_job_names() {
        let mock = MockChronos::default()
            .with_job(json!({ "name": "job-b" }))
            .with_job(json!({ "name": "job-a" }));
        let backend = backend_for(mock).await;

        assert_eq!(backend.list_all_job_names().await.unwrap(), vec!["job-a", "job-b"]);
        assert_eq!(backend.list_job_names("default").await.unwrap(), vec!["job-a", "job-b"]);
        assert!(backend.list_job_names("gcp").await.is_err());
    }
}
