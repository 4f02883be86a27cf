//! Strand Core
//!
//! Core types shared by the Strand worker, the backend adapters and the CLI.
//!
//! This crate contains:
//! - Domain types: job specifications, backend status, gateway job records
//! - DTOs: payloads exchanged with the science gateway

pub mod domain;
pub mod dto;
