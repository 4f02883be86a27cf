//! Service layer
//!
//! Services contain the worker's business logic: turning a job request's
//! stage plan into a RunSet, capturing stage results, and driving one job
//! from dequeue to its final status.

mod artifacts;
mod pipeline;
mod processor;

pub use artifacts::ArtifactManifestHook;
pub use pipeline::PipelineBuilder;
pub use processor::JobProcessor;
