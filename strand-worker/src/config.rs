//! Worker configuration
//!
//! Defines all configurable parameters for the worker: queue polling,
//! RunSet loop timing, concurrency, shared storage and the backend
//! connection settings.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use strand_backend::{HttpSettings, RetryPolicy};

use crate::scheduler::RunSetConfig;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance
    pub worker_id: String,

    /// Gateway base URL (e.g., "http://localhost:8080")
    pub gateway_url: String,

    /// How often to poll the gateway queue for new jobs
    pub poll_interval: Duration,

    /// Sleep between two rounds of a RunSet loop
    pub run_poll_interval: Duration,

    /// Hard limit on how long one RunSet may run; unset means no limit
    pub run_deadline: Option<Duration>,

    /// Max jobs processed concurrently
    pub max_parallel_jobs: usize,

    /// Root of the shared storage holding job working directories
    pub work_root: PathBuf,

    /// JSON file describing the execution backend
    pub backend_config: PathBuf,

    pub retry: RetryPolicy,

    pub http_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, gateway_url: String) -> Self {
        Self {
            worker_id,
            gateway_url,
            poll_interval: Duration::from_secs(5),
            run_poll_interval: Duration::from_secs(5),
            run_deadline: None,
            max_parallel_jobs: 2,
            work_root: PathBuf::from("/tmp/strand"),
            backend_config: PathBuf::from("/etc/strand/backend.json"),
            retry: RetryPolicy::default(),
            http_timeout: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WORKER_ID (required)
    /// - GATEWAY_URL (required)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - RUN_POLL_INTERVAL (optional, seconds, default: 5)
    /// - RUN_DEADLINE (optional, seconds, default: none)
    /// - MAX_PARALLEL_JOBS (optional, default: 2)
    /// - WORK_ROOT (optional, default: /tmp/strand)
    /// - BACKEND_CONFIG (optional, default: /etc/strand/backend.json)
    /// - RETRY_MAX_ATTEMPTS (optional, default: 5)
    /// - RETRY_DELAY_MS (optional, default: 2000)
    /// - HTTP_TIMEOUT (optional, seconds, default: 30)
    pub fn from_env() -> anyhow::Result<Self> {
        let worker_id = std::env::var("WORKER_ID")
            .map_err(|_| anyhow::anyhow!("WORKER_ID environment variable not set"))?;

        let gateway_url = std::env::var("GATEWAY_URL")
            .map_err(|_| anyhow::anyhow!("GATEWAY_URL environment variable not set"))?;

        let mut config = Self::new(worker_id, gateway_url);

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RUN_POLL_INTERVAL") {
            config.run_poll_interval = Duration::from_secs(secs);
        }
        config.run_deadline = env_parse::<u64>("RUN_DEADLINE").map(Duration::from_secs);
        if let Some(max) = env_parse::<usize>("MAX_PARALLEL_JOBS") {
            config.max_parallel_jobs = max;
        }
        if let Ok(root) = std::env::var("WORK_ROOT") {
            config.work_root = PathBuf::from(root);
        }
        if let Ok(path) = std::env::var("BACKEND_CONFIG") {
            config.backend_config = PathBuf::from(path);
        }

        let max_attempts =
            env_parse::<u32>("RETRY_MAX_ATTEMPTS").unwrap_or(config.retry.max_attempts);
        let delay = env_parse::<u64>("RETRY_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(config.retry.delay);
        config.retry = RetryPolicy::new(max_attempts, delay);

        if let Some(secs) = env_parse::<u64>("HTTP_TIMEOUT") {
            config.http_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            anyhow::bail!("gateway_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.run_poll_interval.is_zero() {
            anyhow::bail!("run_poll_interval must be greater than 0");
        }

        if self.run_deadline.is_some_and(|d| d.is_zero()) {
            anyhow::bail!("run_deadline must be greater than 0 when set");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.http_timeout.is_zero() {
            anyhow::bail!("http_timeout must be greater than 0");
        }

        Ok(())
    }

    /// HTTP settings shared by the backend and the gateway client
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: self.http_timeout,
            retry: self.retry,
        }
    }

    pub fn run_set_config(&self) -> RunSetConfig {
        RunSetConfig {
            poll_interval: self.run_poll_interval,
            deadline: self.run_deadline,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}
