//! Cache key derivation
//!
//! Every tier names an artifact through the same key so that files written by
//! one tier are found by the others.

use std::path::{Path, PathBuf};

use common::models::{ArtifactId, CacheKey, ID_SEPARATOR};
use common::utils::safe_relative_path;

/// Replacement for the identifier separator inside a cache key
pub const KEY_SEPARATOR: &str = "--";

/// Top-level remote namespace holding every cached model
pub const REMOTE_NAMESPACE: &str = "models";

/// Maps artifact identifiers to cache keys and tier locations
pub struct CacheKeyResolver;

impl CacheKeyResolver {
    /// Derives the cache key: `org/name` becomes `org--name`
    ///
    /// Identifier validation forbids `--` and segments with a leading or
    /// trailing `-`, so every `--` in a key stands for exactly one separator
    /// and the mapping cannot collide.
    pub fn resolve(id: &ArtifactId) -> CacheKey {
        CacheKey::new(id.as_str().replace(ID_SEPARATOR, KEY_SEPARATOR))
    }

    /// Local directory of the entry: `<cache_root>/<key>`
    pub fn local_path(key: &CacheKey, cache_root: &Path) -> PathBuf {
        cache_root.join(key.as_str())
    }

    /// Remote prefix of the entry: `models/<key>/`
    pub fn remote_prefix(key: &CacheKey) -> String {
        format!("{}/{}/", REMOTE_NAMESPACE, key)
    }

    /// Remote object name of an entry file given its forward-slash relative path
    pub fn relative_object_name(prefix: &str, relative: &str) -> String {
        format!("{}{}", prefix, relative)
    }

    /// Relative local path of a remote object under `prefix`
    ///
    /// Returns `None` for objects outside the prefix, directory placeholders,
    /// and names that would escape the entry directory.
    pub fn relative_path(prefix: &str, name: &str) -> Option<PathBuf> {
        if name.ends_with('/') {
            return None;
        }
        safe_relative_path(name.strip_prefix(prefix)?)
    }
}
