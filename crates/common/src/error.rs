//! Error types for the common crate
//!
//! This module defines the error taxonomy shared by every cache tier and the
//! serving layer. The error is `Clone` so that a single failed load can be
//! handed to every caller that was waiting on it.

use std::sync::Arc;
use thiserror::Error;

/// Result type for model server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for model server operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local cache directory cannot be created, written or read
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote blob store unreachable or listing failed
    #[error("Remote store error: {0}")]
    TransientStore(String),

    /// Write-back to the remote blob store failed
    #[error("Upload error: {0}")]
    Upload(String),

    /// Origin fetch failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Origin refused access without valid credentials
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Artifact has not reached the loaded state
    #[error("Model not loaded: {0}")]
    NotLoaded(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// External service error
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(err))
    }
}

impl Error {
    /// Returns true if the origin demanded credentials
    pub fn is_auth_required(&self) -> bool {
        matches!(self, Error::AuthRequired(_))
    }

    /// Returns true if the remote tier was unreachable
    pub fn is_transient_store(&self) -> bool {
        matches!(self, Error::TransientStore(_))
    }

    /// Returns true if the error is a not loaded error
    pub fn is_not_loaded(&self) -> bool {
        matches!(self, Error::NotLoaded(_))
    }

    /// Returns true if the error is a storage error
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// Returns true if the error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
