//! Kubernetes execution backend
//!
//! Runs every job as a batch/v1 `Job` through the API server's REST
//! interface. Each cloud selector maps to one cluster (API URL, namespace,
//! credentials, scheduling constraints and the shared job volume).
//!
//! Deleting a job is two-phase: the job's parallelism is first set to zero
//! so it stops spawning pods, its running pods are waited on (and reaped if
//! they linger), and only then is the job record itself removed. Pods that
//! already terminated are reaped straight away.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

use strand_core::domain::backend::{BackendHandle, BackendStatus};
use strand_core::domain::spec::JobSpec;

use crate::ExecutionBackend;
use crate::config::ClusterConfig;
use crate::error::{BackendError, Result, ensure_success};
use crate::retry::{RetryPolicy, send_with_retry};

/// Number of log lines included in failure details
const LOG_TAIL_LINES: u32 = 50;

/// Label put on every job and pod created by this backend
const MANAGED_BY: &str = "strand";

/// Execution backend backed by Kubernetes batch jobs
pub struct KubernetesBackend {
    client: Client,
    clusters: HashMap<String, ClusterConfig>,
    retry: RetryPolicy,
    drain_attempts: u32,
    drain_delay: Duration,
}

impl KubernetesBackend {
    /// Creates a backend over the given clusters, keyed by cloud selector
    pub fn new(
        client: Client,
        clusters: HashMap<String, ClusterConfig>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            clusters,
            retry,
            drain_attempts: 12,
            drain_delay: Duration::from_secs(5),
        }
    }

    /// Sets how many times, and how far apart, a delete checks that the
    /// job's pods are gone before reaping them
    pub fn with_drain(mut self, attempts: u32, delay: Duration) -> Self {
        self.drain_attempts = attempts;
        self.drain_delay = delay;
        self
    }

    fn cluster(&self, cloud: &str) -> Result<&ClusterConfig> {
        self.clusters
            .get(cloud)
            .ok_or_else(|| BackendError::UnknownCloud(cloud.to_string()))
    }

    fn request(&self, cluster: &ClusterConfig, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &cluster.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn jobs_url(cluster: &ClusterConfig) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            cluster.api_url.trim_end_matches('/'),
            cluster.namespace
        )
    }

    fn job_url(cluster: &ClusterConfig, name: &str) -> String {
        format!("{}/{}", Self::jobs_url(cluster), name)
    }

    fn pods_url(cluster: &ClusterConfig) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods",
            cluster.api_url.trim_end_matches('/'),
            cluster.namespace
        )
    }

    /// Fetches a job object; `Ok(None)` when the API server has no such job
    async fn job_object(&self, cluster: &ClusterConfig, name: &str) -> Result<Option<JobObject>> {
        let url = Self::job_url(cluster, name);
        let label = format!("get job {}", name);

        let response = send_with_retry(&self.retry, &label, || {
            self.request(cluster, Method::GET, &url).send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let job = ensure_success(response)
            .await?
            .json::<JobObject>()
            .await
            .map_err(|e| BackendError::ParseError(format!("job {}: {}", name, e)))?;

        Ok(Some(job))
    }

    /// Pods created for a job
    async fn list_pods(&self, cluster: &ClusterConfig, name: &str) -> Result<Vec<ObjectItem>> {
        let url = Self::pods_url(cluster);
        let selector = format!("job-name={}", name);
        let label = format!("list pods of {}", name);

        let response = send_with_retry(&self.retry, &label, || {
            self.request(cluster, Method::GET, &url)
                .query(&[("labelSelector", &selector)])
                .send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        let pods = ensure_success(response)
            .await?
            .json::<ObjectList>()
            .await
            .map_err(|e| BackendError::ParseError(format!("pod list of {}: {}", name, e)))?;

        Ok(pods.items)
    }

    /// Deletes every pod still carrying the job's label
    async fn reap_pods(&self, cluster: &ClusterConfig, name: &str) -> Result<()> {
        let url = Self::pods_url(cluster);
        let selector = format!("job-name={}", name);
        let label = format!("reap pods of {}", name);

        let response = send_with_retry(&self.retry, &label, || {
            self.request(cluster, Method::DELETE, &url)
                .query(&[("labelSelector", &selector)])
                .send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response).await?;
        }
        Ok(())
    }

    /// Waits for a scaled-down job's pods to terminate, reaping leftovers
    async fn drain_pods(&self, cluster: &ClusterConfig, name: &str) -> Result<()> {
        for attempt in 1..=self.drain_attempts {
            let pods = self.list_pods(cluster, name).await?;
            if pods.is_empty() {
                return Ok(());
            }

            let running = pods.iter().filter(|pod| !pod.has_terminated()).count();
            if running == 0 {
                debug!("Reaping {} terminated pod(s) of {}", pods.len(), name);
                return self.reap_pods(cluster, name).await;
            }

            debug!(
                "Waiting for {} pod(s) of {} to terminate (attempt {}/{})",
                running,
                name,
                attempt,
                self.drain_attempts
            );

            if attempt < self.drain_attempts {
                tokio::time::sleep(self.drain_delay).await;
            }
        }

        warn!("Pods of job {} did not terminate, reaping them", name);
        self.reap_pods(cluster, name).await
    }

    /// Tail of the log of the job's first pod
    async fn first_pod_log(
        &self,
        cluster: &ClusterConfig,
        name: &str,
    ) -> Result<Option<(String, String)>> {
        let Some(pod) = self
            .list_pods(cluster, name)
            .await?
            .into_iter()
            .next()
            .map(|pod| pod.metadata.name)
        else {
            return Ok(None);
        };

        let url = format!("{}/{}/log", Self::pods_url(cluster), pod);
        let label = format!("read log of pod {}", pod);
        let tail = LOG_TAIL_LINES.to_string();

        let response = send_with_retry(&self.retry, &label, || {
            self.request(cluster, Method::GET, &url)
                .query(&[("tailLines", &tail)])
                .send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        let log = ensure_success(response).await?.text().await?;
        Ok(Some((pod, log)))
    }
}

#[async_trait]
impl ExecutionBackend for KubernetesBackend {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<BackendHandle> {
        let cluster = self.cluster(spec.cloud())?;
        let url = Self::jobs_url(cluster);
        let manifest = job_manifest(spec, cluster);
        let label = format!("create job {}", spec.name());

        let response = send_with_retry(&self.retry, &label, || {
            self.request(cluster, Method::POST, &url)
                .json(&manifest)
                .send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        // A retried POST may find the job created by an earlier attempt
        if response.status() == StatusCode::CONFLICT {
            warn!("Job {} already exists, adopting it", spec.name());
        } else {
            ensure_success(response).await?;
        }

        info!(
            "Created Kubernetes job {} in namespace {}",
            spec.name(),
            cluster.namespace
        );
        Ok(BackendHandle::new(spec.name(), spec.cloud()))
    }

    async fn poll_status(&self, handle: &BackendHandle) -> BackendStatus {
        let cluster = match self.cluster(handle.cloud()) {
            Ok(cluster) => cluster,
            Err(e) => {
                warn!("Cannot poll {}: {}", handle, e);
                return BackendStatus::Unknown;
            }
        };

        match self.job_object(cluster, handle.name()).await {
            Ok(Some(job)) => {
                let status = classify(&job.status);
                debug!("Job {} is {}", handle.name(), status);
                status
            }
            Ok(None) => {
                warn!("Job {} no longer exists on the backend", handle.name());
                BackendStatus::Failed
            }
            Err(e) => {
                warn!("Failed to poll job {}: {}", handle.name(), e);
                BackendStatus::Unknown
            }
        }
    }

    async fn fetch_error_detail(&self, handle: &BackendHandle) -> String {
        let cluster = match self.cluster(handle.cloud()) {
            Ok(cluster) => cluster,
            Err(e) => return e.to_string(),
        };

        let mut detail = match self.job_object(cluster, handle.name()).await {
            Ok(Some(job)) => failure_summary(handle.name(), &job.status),
            Ok(None) => format!("job {} no longer exists on the backend", handle.name()),
            Err(e) => format!("job {} failed (status unavailable: {})", handle.name(), e),
        };

        match self.first_pod_log(cluster, handle.name()).await {
            Ok(Some((pod, log))) if !log.trim().is_empty() => {
                detail.push_str(&format!(
                    "\n--- last {} log lines of pod {} ---\n{}",
                    LOG_TAIL_LINES,
                    pod,
                    log.trim_end()
                ));
            }
            Ok(_) => {}
            Err(e) => debug!("No logs available for {}: {}", handle.name(), e),
        }

        detail
    }

    async fn delete(&self, handle: &BackendHandle) -> Result<()> {
        let cluster = self.cluster(handle.cloud())?;
        let name = handle.name();
        let url = Self::job_url(cluster, name);

        // Phase 1: stop the job from spawning pods
        let label = format!("scale down job {}", name);
        let patch = json!({ "spec": { "parallelism": 0 } }).to_string();
        let response = send_with_retry(&self.retry, &label, || {
            self.request(cluster, Method::PATCH, &url)
                .header(CONTENT_TYPE, "application/merge-patch+json")
                .body(patch.clone())
                .send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        let job_exists = response.status() != StatusCode::NOT_FOUND;
        if job_exists {
            ensure_success(response).await?;
        }

        // Phase 2: wait for the pods to go away
        self.drain_pods(cluster, name).await?;

        if !job_exists {
            debug!("Job {} was already deleted", name);
            return Ok(());
        }

        // Phase 3: remove the job record
        let label = format!("delete job {}", name);
        let response = send_with_retry(&self.retry, &label, || {
            self.request(cluster, Method::DELETE, &url)
                .query(&[("propagationPolicy", "Background")])
                .send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response).await?;
        }

        info!("Deleted Kubernetes job {}", name);
        Ok(())
    }

    async fn list_job_names(&self, cloud: &str) -> Result<Vec<String>> {
        let cluster = self.cluster(cloud)?;
        let url = Self::jobs_url(cluster);
        let label = format!("list jobs on {}", cloud);

        let response = send_with_retry(&self.retry, &label, || {
            self.request(cluster, Method::GET, &url).send()
        })
        .await
        .ok_or_else(|| BackendError::Unavailable(label.clone()))?;

        let jobs = ensure_success(response)
            .await?
            .json::<ObjectList>()
            .await
            .map_err(|e| BackendError::ParseError(format!("job list: {}", e)))?;

        let mut names = jobs.names();
        names.sort();
        Ok(names)
    }

    async fn list_all_job_names(&self) -> Result<Vec<String>> {
        let mut clouds: Vec<&String> = self.clusters.keys().collect();
        clouds.sort();

        let mut names = BTreeSet::new();
        for cloud in clouds {
            names.extend(self.list_job_names(cloud).await?);
        }

        Ok(names.into_iter().collect())
    }
}

/// Builds the batch/v1 Job document for a spec
pub(crate) fn job_manifest(spec: &JobSpec, cluster: &ClusterConfig) -> Value {
    let resources = spec.resources();
    let env: Vec<Value> = spec
        .env()
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut container = json!({
        "name": "main",
        "image": spec.image(),
        "command": ["/bin/sh", "-c", spec.command()],
        "env": env,
        "resources": {
            "requests": {
                "cpu": format!("{}m", resources.cpu_request_millis()),
                "memory": format!("{}Mi", resources.memory_request_mb),
            },
            "limits": {
                "cpu": format!("{}m", resources.cpu_limit_millis()),
                "memory": format!("{}Mi", resources.memory_limit_mb),
            },
        },
    });

    let mut pod_spec = json!({ "restartPolicy": "Never" });

    if let Some(volume) = &cluster.volume {
        container["volumeMounts"] = json!([{ "name": "shared", "mountPath": volume.mount_path }]);
        pod_spec["volumes"] = json!([{
            "name": "shared",
            "persistentVolumeClaim": { "claimName": volume.claim_name },
        }]);
    }
    if !cluster.node_selector.is_empty() {
        pod_spec["nodeSelector"] = json!(cluster.node_selector);
    }
    if !cluster.tolerations.is_empty() {
        pod_spec["tolerations"] = Value::Array(cluster.tolerations.clone());
    }
    pod_spec["containers"] = json!([container]);

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": spec.name(),
            "labels": { "app.kubernetes.io/managed-by": MANAGED_BY },
        },
        "spec": {
            "backoffLimit": 0,
            "activeDeadlineSeconds": spec.timeout().as_secs(),
            "template": {
                "metadata": { "labels": { "app.kubernetes.io/managed-by": MANAGED_BY } },
                "spec": pod_spec,
            },
        },
    })
}

#[derive(Debug, Default, Deserialize)]
struct JobObject {
    #[serde(default)]
    status: JobObjectStatus,
}

#[derive(Debug, Default, Deserialize)]
struct JobObjectStatus {
    #[serde(default)]
    succeeded: u32,
    #[serde(default)]
    failed: u32,
    #[serde(default)]
    conditions: Vec<JobCondition>,
}

#[derive(Debug, Deserialize)]
struct JobCondition {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl JobCondition {
    fn is(&self, kind: &str) -> bool {
        self.kind == kind && self.status == "True"
    }
}

#[derive(Debug, Default, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    metadata: ObjectMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

impl ObjectItem {
    /// Whether the item is a pod that ran to completion or failed
    fn has_terminated(&self) -> bool {
        matches!(self.status.phase.as_deref(), Some("Succeeded" | "Failed"))
    }
}

impl ObjectList {
    fn names(self) -> Vec<String> {
        self.items.into_iter().map(|item| item.metadata.name).collect()
    }
}

fn classify(status: &JobObjectStatus) -> BackendStatus {
    let has = |kind: &str| status.conditions.iter().any(|c| c.is(kind));

    if status.failed > 0 || has("Failed") {
        BackendStatus::Failed
    } else if status.succeeded > 0 || has("Complete") {
        BackendStatus::Complete
    } else {
        BackendStatus::Running
    }
}

fn failure_summary(name: &str, status: &JobObjectStatus) -> String {
    let reasons: Vec<String> = status
        .conditions
        .iter()
        .filter(|c| c.is("Failed"))
        .map(|c| match (&c.reason, &c.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (Some(text), None) | (None, Some(text)) => text.clone(),
            (None, None) => "Failed".to_string(),
        })
        .collect();

    if reasons.is_empty() {
        format!("job {} failed", name)
    } else {
        format!("job {} failed: {}", name, reasons.join("; "))
    }
}
