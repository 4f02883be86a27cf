//! Runner layer
//!
//! A Runner is one schedulable unit of work: it knows when its
//! prerequisites are met, how to launch itself, and how to tell whether it
//! has finished or failed. The RunSet loop drives Runners exclusively
//! through the [`Runner`] trait.

pub mod backend;

pub use backend::BackendRunner;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Lifecycle position of a Runner, derived from its queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    NotStarted,
    Ready,
    Started,
    Failed,
    Done,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::NotStarted => write!(f, "not started"),
            RunnerState::Ready => write!(f, "ready"),
            RunnerState::Started => write!(f, "started"),
            RunnerState::Failed => write!(f, "failed"),
            RunnerState::Done => write!(f, "done"),
        }
    }
}

/// Contract between the RunSet loop and one unit of work
///
/// All queries take `&self`; implementations keep their state behind
/// atomics so they can be shared as `Arc<dyn Runner>` with downstream
/// Runners that depend on them.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Whether every prerequisite is satisfied
    async fn is_ready(&self) -> bool;

    /// Whether [`Runner::start`] was called, whatever its outcome
    fn is_started(&self) -> bool;

    /// Launches the work
    ///
    /// Only the first call has any effect. Launch errors are reported via
    /// [`Runner::is_failed`] and [`Runner::error_message`].
    async fn start(&self);

    /// Whether the outputs are observably complete
    ///
    /// May be true before `start` when the outputs already exist.
    async fn is_done(&self) -> bool;

    /// Whether the work failed; once true, stays true
    async fn is_failed(&self) -> bool;

    /// Reason for the failure, if any
    async fn error_message(&self) -> Option<String>;

    /// Captures results and cleans up after completion
    ///
    /// Called once, after `is_done` first reported true.
    async fn on_done(&self) -> Result<()>;

    /// Whether `on_done` ran to completion
    ///
    /// Downstream Runners gate on this rather than on `is_done`, so nothing
    /// new starts before an upstream stage's results are captured.
    fn is_finished(&self) -> bool;

    /// Best-effort teardown of everything this Runner created remotely
    ///
    /// Idempotent; succeeds when nothing is left to delete.
    async fn delete_job_record(&self) -> Result<()>;

    /// Current lifecycle position, for diagnostics
    async fn state(&self) -> RunnerState {
        if self.is_failed().await {
            RunnerState::Failed
        } else if self.is_done().await {
            RunnerState::Done
        } else if self.is_started() {
            RunnerState::Started
        } else if self.is_ready().await {
            RunnerState::Ready
        } else {
            RunnerState::NotStarted
        }
    }
}

/// Result capture invoked when a stage completes
#[async_trait]
pub trait OnDoneHook: Send + Sync {
    /// Called with the completed stage's name and its expected output paths
    async fn on_stage_done(&self, stage: &str, outputs: &[PathBuf]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRunner;

    #[tokio::test]
    async fn test_state_follows_queries() {
        let runner = MockRunner::new("prep");
        runner.set_ready(false);
        assert_eq!(runner.state().await, RunnerState::NotStarted);

        runner.set_ready(true);
        assert_eq!(runner.state().await, RunnerState::Ready);

        runner.start().await;
        assert_eq!(runner.state().await, RunnerState::Started);

        runner.set_done(true);
        assert_eq!(runner.state().await, RunnerState::Done);
        assert!(!runner.is_finished());
        runner.on_done().await.unwrap();
        assert!(runner.is_finished());

        runner.set_failed(true);
        assert_eq!(runner.state().await, RunnerState::Failed);
    }
}
