//! In-memory representation of a loaded model
//!
//! Loading reads the manifest and takes an inventory of the entry's files.
//! The decoding runtime works from this handle and the files it points at.

use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use common::error::{Error, Result};
use common::models::{ArtifactId, CacheKey};
use common::types::ArtifactSource;
use common::utils::{format_bytes, relative_object_path};

/// One file of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactFile {
    /// Path relative to the entry, forward-slash separated
    pub path: String,

    /// Size in bytes
    pub size: u64,
}

/// Memory representation of a loaded model
#[derive(Debug, Clone, Serialize)]
pub struct LoadedArtifact {
    /// Model ID
    pub id: ArtifactId,

    /// Cache key
    pub key: CacheKey,

    /// Local cache entry directory
    pub root: PathBuf,

    /// Manifest contents, when the marker file holds JSON
    pub manifest: Option<serde_json::Value>,

    /// Files in the entry, sorted by path
    pub files: Vec<ArtifactFile>,

    /// Tier the model was resolved from
    pub source: ArtifactSource,

    /// Load timestamp
    pub load_time: DateTime<Utc>,
}

impl LoadedArtifact {
    /// Loads an artifact from its local entry directory
    ///
    /// Only local files are read. A missing or unreadable manifest is an
    /// `Error::Storage`; its contents are only parsed opportunistically.
    pub async fn open(
        id: ArtifactId,
        key: CacheKey,
        root: PathBuf,
        manifest_file: &str,
        source: ArtifactSource,
    ) -> Result<Self> {
        let manifest_path = root.join(manifest_file);
        let entry = root.clone();

        let (manifest, files) = tokio::task::spawn_blocking(move || -> Result<_> {
            let bytes = std::fs::read(&manifest_path).map_err(|e| {
                Error::Storage(format!("cannot read manifest {}: {}", manifest_path.display(), e))
            })?;
            let manifest = match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!("Manifest {} is not JSON ({}), keeping it opaque", manifest_path.display(), e);
                    None
                }
            };

            Ok((manifest, inventory(&entry)?))
        })
        .await
        .map_err(|e| Error::Internal(format!("artifact read task failed: {}", e)))??;

        let artifact = Self {
            id,
            key,
            root,
            manifest,
            files,
            source,
            load_time: Utc::now(),
        };

        debug!(
            "Read {} files ({}) for {} from {}",
            artifact.files.len(),
            format_bytes(artifact.total_bytes()),
            artifact.id,
            artifact.root.display()
        );

        Ok(artifact)
    }

    /// Total size of all files
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Looks up a file by its relative path
    pub fn file(&self, path: &str) -> Option<&ArtifactFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Absolute path of a file in the entry
    pub fn path_of(&self, relative: &str) -> PathBuf {
        relative.split('/').fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Reads a top-level string field of the manifest, e.g. `model_type`
    pub fn manifest_str(&self, field: &str) -> Option<&str> {
        self.manifest.as_ref()?.get(field).and_then(|v| v.as_str())
    }
}

/// Lists the regular files under `root` as forward-slash relative paths
pub(crate) fn inventory(root: &Path) -> Result<Vec<ArtifactFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| Error::Storage(format!("cannot walk {}: {}", root.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(path) = relative_object_path(root, entry.path()) {
            let size = entry
                .metadata()
                .map_err(|e| Error::Storage(format!("cannot stat {}: {}", entry.path().display(), e)))?
                .len();
            files.push(ArtifactFile { path, size });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
