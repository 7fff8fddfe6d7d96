//! Blob store abstraction

use std::path::Path;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::error::Result;

/// One object in a remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    /// Full object name, including the listed prefix
    pub name: String,

    /// Object size in bytes, when the store reports it
    pub size: Option<u64>,
}

/// Flat object namespace that stores whole files
///
/// Listing and download failures caused by connectivity are reported as
/// `Error::TransientStore`; upload failures as `Error::Upload`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket or root the store points at, for logs
    fn location(&self) -> &str;

    /// Lists every object whose name starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<BlobDescriptor>>;

    /// Writes the object's content to `destination`, returning the byte count
    async fn download(&self, object: &str, destination: &Path) -> Result<u64>;

    /// Stores the file at `source` under `object`, returning the byte count
    async fn upload(&self, source: &Path, object: &str) -> Result<u64>;
}
