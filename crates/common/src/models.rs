//! Artifact naming models
//!
//! This module defines the identifier that names an artifact across every
//! cache tier, and the filesystem-safe key derived from it.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between the segments of an artifact identifier
pub const ID_SEPARATOR: char = '/';

/// Hierarchical artifact name such as `org/name`
///
/// Segments are restricted to ASCII alphanumerics, `-`, `_` and `.`, may not
/// start or end with `-` or `.`, and may not contain `--` or `..`. These are the
/// hub naming rules, and they keep the derived cache key collision-free.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Parses and validates an artifact identifier
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();

        if value.is_empty() {
            return Err(Error::InvalidArgument("artifact identifier is empty".to_string()));
        }

        for segment in value.split(ID_SEPARATOR) {
            validate_segment(&value, segment)?;
        }

        Ok(Self(value))
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the identifier's segments
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(ID_SEPARATOR)
    }
}

fn validate_segment(id: &str, segment: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::InvalidArgument(format!(
            "invalid artifact identifier '{}': {}",
            id, reason
        )))
    };

    if segment.is_empty() {
        return invalid("empty segment");
    }

    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("only ASCII letters, digits, '-', '_' and '.' are allowed");
    }

    if segment.starts_with(['-', '.']) || segment.ends_with(['-', '.']) {
        return invalid("segments may not start or end with '-' or '.'");
    }

    if segment.contains("--") || segment.contains("..") {
        return invalid("'--' and '..' are reserved");
    }

    Ok(())
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

/// Filesystem-safe key derived from an [`ArtifactId`]
///
/// Used as the local cache directory name and inside the remote prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an already derived key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
