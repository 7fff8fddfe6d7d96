//! Directory-backed blob store
//!
//! Treats a directory as a bucket: object `a/b/c` is the file `<root>/a/b/c`.
//! Useful for mounted bucket volumes and local development.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use common::error::{Error, Result};
use common::utils::{relative_object_path, safe_relative_path};

use crate::blob::{BlobDescriptor, BlobStore};

/// Blob store rooted at a local directory
pub struct FilesystemBlobStore {
    root: PathBuf,
    location: String,
}

impl FilesystemBlobStore {
    /// Creates a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let location = root.display().to_string();
        Self { root, location }
    }

    /// Returns the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, object: &str) -> Result<PathBuf> {
        safe_relative_path(object)
            .map(|relative| self.root.join(relative))
            .ok_or_else(|| Error::InvalidArgument(format!("invalid object name: {}", object)))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    fn location(&self) -> &str {
        &self.location
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobDescriptor>> {
        // Walk only the directory holding the prefix, then filter by name.
        let start = match prefix.rfind('/') {
            Some(index) => match safe_relative_path(&prefix[..index]) {
                Some(relative) => self.root.join(relative),
                None => return Ok(Vec::new()),
            },
            None => self.root.clone(),
        };

        if !self.root.is_dir() {
            return Err(Error::TransientStore(format!(
                "blob store root {} is not a directory",
                self.root.display()
            )));
        }

        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<BlobDescriptor>> {
            let mut blobs = Vec::new();
            if !start.is_dir() {
                return Ok(blobs);
            }

            for entry in WalkDir::new(&start).follow_links(true) {
                let entry = entry.map_err(|e| Error::TransientStore(format!("listing failed: {}", e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }

                if let Some(name) = relative_object_path(&root, entry.path()) {
                    if name.starts_with(&prefix) {
                        let size = entry.metadata().ok().map(|m| m.len());
                        blobs.push(BlobDescriptor { name, size });
                    }
                }
            }

            blobs.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(blobs)
        })
        .await
        .map_err(|e| Error::Internal(format!("listing task failed: {}", e)))?
    }

    async fn download(&self, object: &str, destination: &Path) -> Result<u64> {
        let source = self.object_path(object)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Copying {} to {}", source.display(), destination.display());
        tokio::fs::copy(&source, destination)
            .await
            .map_err(|e| Error::TransientStore(format!("failed to read {}: {}", object, e)))
    }

    async fn upload(&self, source: &Path, object: &str) -> Result<u64> {
        let target = self.object_path(object)?;

        let copy = async {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(source, &target).await
        };

        copy.await
            .map_err(|e| Error::Upload(format!("failed to store {}: {}", object, e)))
    }
}
