//! Configuration management for the model server
//!
//! This crate reads the service settings from the process environment,
//! applies defaults and validates them.

pub mod environment;
pub mod defaults;

// Re-export commonly used types
pub use environment::{BlobStoreKind, ServiceConfig};
