//! Common types for the model server
//!
//! This module defines the load lifecycle and the cache tiers an artifact can
//! be resolved from.

use std::fmt;
use serde::{Deserialize, Serialize};

/// Lifecycle of an artifact inside a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// No load has been attempted
    Unloaded,
    /// A load is in flight
    Loading,
    /// The artifact is resident; terminal
    Loaded,
    /// The last load failed; the next request retries
    Failed,
}

impl LoadState {
    /// Returns true if the artifact is resident
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded)
    }
}

impl Default for LoadState {
    fn default() -> Self {
        LoadState::Unloaded
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Unloaded => write!(f, "unloaded"),
            LoadState::Loading => write!(f, "loading"),
            LoadState::Loaded => write!(f, "loaded"),
            LoadState::Failed => write!(f, "failed"),
        }
    }
}

/// Cache tier an artifact was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    /// Local disk cache
    Local,
    /// Remote blob store, materialised into the local cache
    Remote,
    /// Authoritative origin
    Origin,
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactSource::Local => write!(f, "local"),
            ArtifactSource::Remote => write!(f, "remote"),
            ArtifactSource::Origin => write!(f, "origin"),
        }
    }
}
