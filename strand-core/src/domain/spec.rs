//! Job specification
//!
//! A `JobSpec` is the immutable description of one remote unit of work:
//! what to run, where to run it and with which resources. It is validated
//! once when built; a spec that exists is always submittable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Longest name accepted by every backend (DNS-1123 label)
pub const MAX_NAME_LEN: usize = 63;

/// Cloud selector used when none is given
pub const DEFAULT_CLOUD: &str = "default";

/// Configuration errors raised while building a `JobSpec`
///
/// These are fatal: a spec that fails validation is never submitted and
/// never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("invalid job name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("container image cannot be empty")]
    EmptyImage,

    #[error("command cannot be empty")]
    EmptyCommand,

    #[error("timeout must be greater than 0")]
    ZeroTimeout,

    #[error("cloud selector cannot be empty")]
    EmptyCloud,

    #[error("stage '{suffix}' does not fit after prefix '{prefix}' within {max} characters", max = MAX_NAME_LEN)]
    StageNameTooLong { prefix: String, suffix: String },

    #[error("invalid {resource} resources: request {request} must be > 0 and <= limit {limit}")]
    InvalidResources {
        resource: &'static str,
        request: String,
        limit: String,
    },
}

/// CPU and memory requests/limits for one job
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Requested CPU cores
    pub cpu_request: f64,
    /// CPU cores the job may burst to
    pub cpu_limit: f64,
    /// Requested memory in MB
    pub memory_request_mb: u64,
    /// Memory limit in MB
    pub memory_limit_mb: u64,
}

impl Resources {
    pub fn new(
        cpu_request: f64,
        cpu_limit: f64,
        memory_request_mb: u64,
        memory_limit_mb: u64,
    ) -> Self {
        Self {
            cpu_request,
            cpu_limit,
            memory_request_mb,
            memory_limit_mb,
        }
    }

    /// Checks that every request is positive and does not exceed its limit
    pub fn validate(&self) -> Result<(), SpecError> {
        // NaN fails both comparisons
        if !(self.cpu_request > 0.0 && self.cpu_request <= self.cpu_limit) {
            return Err(SpecError::InvalidResources {
                resource: "cpu",
                request: self.cpu_request.to_string(),
                limit: self.cpu_limit.to_string(),
            });
        }

        if self.memory_request_mb == 0 || self.memory_request_mb > self.memory_limit_mb {
            return Err(SpecError::InvalidResources {
                resource: "memory",
                request: format!("{}MB", self.memory_request_mb),
                limit: format!("{}MB", self.memory_limit_mb),
            });
        }

        Ok(())
    }

    /// CPU request in millicores
    pub fn cpu_request_millis(&self) -> u64 {
        to_millis(self.cpu_request)
    }

    /// CPU limit in millicores
    pub fn cpu_limit_millis(&self) -> u64 {
        to_millis(self.cpu_limit)
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1024, 1024)
    }
}

fn to_millis(cores: f64) -> u64 {
    (cores * 1000.0).round().max(1.0) as u64
}

/// Immutable description of one remote unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    name: String,
    image: String,
    command: String,
    timeout: Duration,
    resources: Resources,
    cloud: String,
    env: BTreeMap<String, String>,
}

impl JobSpec {
    /// Starts building a spec; validation happens in [`JobSpecBuilder::build`]
    pub fn builder(
        name: impl Into<String>,
        image: impl Into<String>,
        command: impl Into<String>,
    ) -> JobSpecBuilder {
        JobSpecBuilder {
            name: name.into(),
            image: image.into(),
            command: command.into(),
            timeout: Duration::from_secs(3600),
            resources: Resources::default(),
            cloud: DEFAULT_CLOUD.to_string(),
            env: BTreeMap::new(),
        }
    }

    /// Unique backend name of this job
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Shell command run inside the container
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Hard deadline the backend enforces on the job
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Selector used to resolve backend connection parameters
    pub fn cloud(&self) -> &str {
        &self.cloud
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

/// Builder for [`JobSpec`]
#[derive(Debug, Clone)]
pub struct JobSpecBuilder {
    name: String,
    image: String,
    command: String,
    timeout: Duration,
    resources: Resources,
    cloud: String,
    env: BTreeMap<String, String>,
}

impl JobSpecBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn cloud(mut self, cloud: impl Into<String>) -> Self {
        self.cloud = cloud.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Validates every field and produces the immutable spec
    pub fn build(self) -> Result<JobSpec, SpecError> {
        validate_name(&self.name)?;

        if self.image.trim().is_empty() {
            return Err(SpecError::EmptyImage);
        }
        if self.command.trim().is_empty() {
            return Err(SpecError::EmptyCommand);
        }
        if self.timeout.as_secs() == 0 {
            return Err(SpecError::ZeroTimeout);
        }
        if self.cloud.trim().is_empty() {
            return Err(SpecError::EmptyCloud);
        }
        self.resources.validate()?;

        Ok(JobSpec {
            name: self.name,
            image: self.image,
            command: self.command,
            timeout: self.timeout,
            resources: self.resources,
            cloud: self.cloud,
            env: self.env,
        })
    }
}

/// Checks a job name against the naming rules shared by all backends
///
/// Names are DNS-1123 labels that additionally start with a letter:
/// lowercase ASCII letters, digits and `-`, at most 63 characters.
pub fn validate_name(name: &str) -> Result<(), SpecError> {
    let invalid = |reason| SpecError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "only lowercase letters, digits and '-' are allowed",
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(invalid("name must start with a letter"));
    }
    if name.ends_with('-') {
        return Err(invalid("name must end with a letter or digit"));
    }

    Ok(())
}

/// Derives a backend name from a job prefix and a pipeline stage suffix
///
/// Both parts are lowercased and stripped of characters the backends reject.
/// Neither part is ever shortened: the prefix carries the job identity, so a
/// combination longer than [`MAX_NAME_LEN`] is rejected rather than risking
/// two jobs sharing one backend name.
pub fn stage_name(prefix: &str, suffix: &str) -> Result<String, SpecError> {
    let suffix = sanitize(suffix);
    let prefix = sanitize(prefix);

    let len = match (prefix.is_empty(), suffix.is_empty()) {
        (false, false) => prefix.len() + 1 + suffix.len(),
        _ => prefix.len() + suffix.len(),
    };
    if len > MAX_NAME_LEN {
        return Err(SpecError::StageNameTooLong { prefix, suffix });
    }

    Ok(match (prefix.is_empty(), suffix.is_empty()) {
        (true, _) => suffix,
        (false, true) => prefix,
        (false, false) => format!("{}-{}", prefix, suffix),
    })
}

fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();

    mapped.trim_matches('-').to_string()
}
