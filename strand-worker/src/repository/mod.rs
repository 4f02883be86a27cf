//! Repository layer
//!
//! Repositories are stateless HTTP clients that abstract communication
//! with the gateway. They provide simple, focused interfaces without any
//! business logic.
//!
//! All repositories are trait-based to enable testing and mocking.

mod jobs;

// Re-export traits
pub use jobs::{JobQueue, JobRecordRepository};

// Re-export implementations
pub use jobs::HttpJobRepository;
