//! Core domain types
//!
//! These types describe remote units of work and the gateway requests that
//! group them. They are shared between the worker (which schedules them),
//! the backend adapters (which submit them) and the CLI (which inspects them).

pub mod backend;
pub mod job;
pub mod spec;
