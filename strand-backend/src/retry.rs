//! Bounded retry helper
//!
//! Every call to a backend control plane goes through [`send_with_retry`].
//! Server errors, throttling, timeouts and connection failures are retried a
//! fixed number of times with a fixed delay; after the last attempt the
//! helper gives up and returns `None`, which callers treat as transient
//! unavailability rather than a failure of the underlying job.

use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How many times, and how far apart, a request is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy; at least one attempt is always made
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

/// Sends a request, retrying transient failures
///
/// `request` is called once per attempt and must build a fresh request each
/// time. Any response that is not retryable (2xx, 3xx, 4xx other than 429)
/// is returned immediately so the caller can interpret it.
///
/// # Returns
/// `Some(response)` for the first non-retryable response, `None` when every
/// attempt failed or the request could not be sent at all.
pub async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut request: F,
) -> Option<Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<Response>>,
{
    for attempt in 1..=policy.max_attempts {
        match request().await {
            Ok(response) if is_retryable_status(response.status()) => {
                warn!(
                    "{} returned {} (attempt {}/{})",
                    label,
                    response.status(),
                    attempt,
                    policy.max_attempts
                );
            }
            Ok(response) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempt(s)", label, attempt);
                }
                return Some(response);
            }
            Err(e) if is_retryable_error(&e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    label, attempt, policy.max_attempts, e
                );
            }
            Err(e) => {
                error!("{} failed with a non-retryable error: {}", label, e);
                return None;
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    error!(
        "{} gave up after {} attempt(s)",
        label, policy.max_attempts
    );
    None
}

/// 5xx and 429 (connection pool or rate limit exhausted)
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}
