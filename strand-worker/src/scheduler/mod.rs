//! Scheduler layer for the worker
//!
//! Two levels of scheduling live here: the queue poller, which decides how
//! many external requests the worker processes at once, and the RunSet
//! loop, which drives the stages of a single request.

pub mod poller;
pub mod run_set;

pub use poller::QueuePoller;
pub use run_set::{RunOutcome, RunSet, RunSetConfig};
