//! HTTP API for the model server
//!
//! This crate exposes text generation and a readiness probe over HTTP. It
//! knows nothing about cache tiers; it talks to a [`GenerationService`].

pub mod handlers;
pub mod routes;

// Re-export commonly used types
pub use handlers::{GenerateRequest, GenerateResponse, GenerationService, HealthResponse};
pub use routes::{router, serve};
