//! iform-import library interface
//!
//! Client side of the warehouse chunked import. Exposes the orchestrator
//! for hosts (the console binary, integration tests) to drive.

pub mod config;
pub mod console;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ImportError, ImportResult};
pub use crate::services::{ImportOptions, ImportOrchestrator, Outcome, Pause};
