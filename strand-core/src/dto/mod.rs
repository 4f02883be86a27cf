//! Data Transfer Objects for gateway communication

pub mod job;
