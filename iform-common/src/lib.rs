//! # iform Common Library
//!
//! Shared code for iform client tools including:
//! - Error types
//! - Import event types (ImportEvent enum) and the EventBus
//! - Configuration loading and tiered value resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
