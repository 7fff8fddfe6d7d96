//! Text generation for the model server
//!
//! This crate defines the boundary between a loaded model and whatever runtime
//! decodes text from it.

pub mod engine;

// Re-export commonly used types
pub use engine::{EchoGenerator, TextGenerator};
