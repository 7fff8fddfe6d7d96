//! Local cache tier
//!
//! Entries live in `<root>/<cache key>/`. An entry counts as cached only when
//! its manifest file exists; a directory without one is treated as absent.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use common::error::{Error, Result};
use common::models::{ArtifactId, CacheKey};
use common::types::ArtifactSource;

use crate::artifact::LoadedArtifact;
use crate::cache_key::CacheKeyResolver;

/// Name of the probe file used to check the cache root is writable
const WRITE_PROBE: &str = ".write-probe";

/// Local disk cache of model artifacts
#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    /// Cache root directory
    root: PathBuf,

    /// File whose presence marks an entry complete
    manifest_file: String,
}

impl LocalCacheStore {
    /// Create a new local cache store
    pub fn new(root: impl Into<PathBuf>, manifest_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            manifest_file: manifest_file.into(),
        }
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Manifest file name
    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    /// Creates the cache root and checks it is writable
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::Storage(format!("cannot create cache root {}: {}", self.root.display(), e))
        })?;

        let probe = self.root.join(WRITE_PROBE);
        tokio::fs::write(&probe, b"ok").await.map_err(|e| {
            Error::Storage(format!("cache root {} is not writable: {}", self.root.display(), e))
        })?;
        let _ = tokio::fs::remove_file(&probe).await;

        info!("Using local model cache at {}", self.root.display());
        Ok(())
    }

    /// Entry directory for `key`
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        CacheKeyResolver::local_path(key, &self.root)
    }

    /// Returns true if the entry for `key` holds its manifest
    pub async fn is_cached(&self, key: &CacheKey) -> bool {
        let entry = self.entry_path(key);
        let is_dir = tokio::fs::metadata(&entry)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return false;
        }

        tokio::fs::metadata(entry.join(&self.manifest_file))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Loads the cached entry for `id` into memory
    ///
    /// Reads local files only. A failure here is `Error::Storage` and is not
    /// repaired from another tier.
    pub async fn read_artifact(&self, id: &ArtifactId) -> Result<LoadedArtifact> {
        let key = CacheKeyResolver::resolve(id);
        let entry = self.entry_path(&key);

        debug!("Reading {} from {}", id, entry.display());
        LoadedArtifact::open(id.clone(), key, entry, &self.manifest_file, ArtifactSource::Local).await
    }
}
