//! Remote cache tier
//!
//! Wraps a [`BlobStore`] with the cache layout: entry files live under
//! `models/<cache key>/` with the same relative paths they have on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use common::error::{Error, Result};
use common::utils::{execute_with_timeout, format_bytes, relative_object_path};
use storage_adapter::{BlobDescriptor, BlobStore};

use crate::cache_key::CacheKeyResolver;

/// Remote blob store shared between serving instances
#[derive(Clone)]
pub struct RemoteBlobStore {
    /// Underlying object store
    store: Arc<dyn BlobStore>,

    /// Bound on each remote operation
    timeout: Duration,

    /// Manifest file name, transferred last
    manifest_file: String,
}

impl RemoteBlobStore {
    /// Create a new remote store
    pub fn new(store: Arc<dyn BlobStore>, timeout: Duration, manifest_file: impl Into<String>) -> Self {
        Self {
            store,
            timeout,
            manifest_file: manifest_file.into(),
        }
    }

    /// Store location for log lines
    pub fn location(&self) -> &str {
        self.store.location()
    }

    /// Lists objects under `prefix`
    pub async fn list(&self, prefix: &str) -> Result<Vec<BlobDescriptor>> {
        execute_with_timeout(self.store.list(prefix), self.timeout, "remote list").await
    }

    /// Downloads every object under `prefix` into `destination`
    ///
    /// Object names have `prefix` stripped and are recreated as relative
    /// paths. Directory placeholders are skipped. The manifest is fetched
    /// last so that an interrupted download never looks like a complete
    /// entry. Returns the number of files written.
    pub async fn download_all(&self, prefix: &str, destination: &Path) -> Result<usize> {
        let mut objects: Vec<(String, PathBuf)> = Vec::new();

        for blob in self.list(prefix).await? {
            if blob.name.ends_with('/') || blob.name == prefix {
                continue;
            }

            match CacheKeyResolver::relative_path(prefix, &blob.name) {
                Some(path) => objects.push((blob.name, path)),
                None => warn!("Skipping remote object with unsafe name: {}", blob.name),
            }
        }

        if objects.is_empty() {
            debug!("No objects under {} in {}", prefix, self.location());
            return Ok(0);
        }

        let manifest = Path::new(&self.manifest_file);
        objects.sort_by_key(|(_, path)| path.as_path() == manifest);

        info!("Downloading {} files from {}{}", objects.len(), self.location(), prefix);

        let mut total = 0u64;
        for (name, relative) in &objects {
            let target = destination.join(relative);
            let operation = format!("remote download {}", name);
            total += execute_with_timeout(self.store.download(name, &target), self.timeout, &operation).await?;
        }

        info!("Downloaded {} from {}{}", format_bytes(total), self.location(), prefix);
        Ok(objects.len())
    }

    /// Uploads every file under `source` to `prefix`
    ///
    /// Any failure is reported as `Error::Upload`. Returns the number of
    /// files uploaded.
    pub async fn upload_all(&self, source: &Path, prefix: &str) -> Result<usize> {
        let root = source.to_path_buf();
        let mut files = tokio::task::spawn_blocking(move || -> Result<Vec<(PathBuf, String)>> {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).follow_links(true) {
                let entry = entry.map_err(|e| Error::Upload(format!("cannot walk {}: {}", root.display(), e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(relative) = relative_object_path(&root, entry.path()) {
                    files.push((entry.path().to_path_buf(), relative));
                }
            }
            Ok(files)
        })
        .await
        .map_err(|e| Error::Upload(format!("upload scan failed: {}", e)))??;

        files.sort_by(|a, b| a.1.cmp(&b.1));
        let manifest = self.manifest_file.as_str();
        files.sort_by_key(|(_, relative)| relative == manifest);

        for (path, relative) in &files {
            let object = CacheKeyResolver::relative_object_name(prefix, relative);
            let operation = format!("remote upload {}", object);
            execute_with_timeout(self.store.upload(path, &object), self.timeout, &operation)
                .await
                .map_err(|e| match e {
                    Error::Upload(message) => Error::Upload(message),
                    other => Error::Upload(other.to_string()),
                })?;
        }

        info!("Uploaded {} files to {}{}", files.len(), self.location(), prefix);
        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_adapter::FilesystemBlobStore;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn remote(bucket: &Path) -> RemoteBlobStore {
        RemoteBlobStore::new(
            Arc::new(FilesystemBlobStore::new(bucket)),
            Duration::from_secs(5),
            "config.json",
        )
    }

    #[tokio::test]
    async fn test_download_all_recreates_layout() {
        let bucket = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        write(&bucket.path().join("models/acme--widget/config.json"), "{}");
        write(&bucket.path().join("models/acme--widget/tok/vocab.txt"), "a b");

        let destination = cache.path().join("acme--widget");
        let count = remote(bucket.path())
            .download_all("models/acme--widget/", &destination)
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert!(destination.join("config.json").is_file());
        assert_eq!(std::fs::read_to_string(destination.join("tok/vocab.txt")).unwrap(), "a b");
    }

    #[tokio::test]
    async fn test_download_all_empty_prefix() {
        let bucket = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let count = remote(bucket.path())
            .download_all("models/none/", &cache.path().join("none"))
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(!cache.path().join("none").exists());
    }

    #[tokio::test]
    async fn test_upload_all_mirrors_files() {
        let bucket = TempDir::new().unwrap();
        let entry = TempDir::new().unwrap();
        write(&entry.path().join("config.json"), "{}");
        write(&entry.path().join("tok/vocab.txt"), "a b");

        let count = remote(bucket.path())
            .upload_all(entry.path(), "models/acme--widget/")
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert!(bucket.path().join("models/acme--widget/config.json").is_file());
        assert!(bucket.path().join("models/acme--widget/tok/vocab.txt").is_file());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_transient() {
        let cache = TempDir::new().unwrap();
        let err = remote(Path::new("/definitely/not/here"))
            .download_all("models/x/", cache.path())
            .await
            .unwrap_err();
        assert!(err.is_transient_store());
    }
}
