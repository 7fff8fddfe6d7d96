//! Default configuration values

use std::path::PathBuf;
use std::time::Duration;

/// Local cache root on the mounted cache volume
pub const CACHE_DIR: &str = "/mnt/disks/model-cache";

/// HTTP listen port
pub const PORT: u16 = 8080;

/// Marker file whose presence makes a cache entry valid
pub const MANIFEST_FILE: &str = "config.json";

/// Origin base URL
pub const HF_ENDPOINT: &str = "https://huggingface.co";

/// Origin revision
pub const HF_REVISION: &str = "main";

/// Per-call bound for remote blob-store operations, in seconds
pub const REMOTE_TIMEOUT_SECS: u64 = 600;

/// Bound for a whole origin fetch, in seconds
pub const ORIGIN_TIMEOUT_SECS: u64 = 3600;

pub(crate) fn cache_dir() -> PathBuf {
    PathBuf::from(CACHE_DIR)
}

pub(crate) fn port() -> u16 {
    PORT
}

pub(crate) fn hf_endpoint() -> String {
    HF_ENDPOINT.to_string()
}

pub(crate) fn hf_revision() -> String {
    HF_REVISION.to_string()
}

pub(crate) fn remote_timeout() -> Duration {
    Duration::from_secs(REMOTE_TIMEOUT_SECS)
}

pub(crate) fn origin_timeout() -> Duration {
    Duration::from_secs(ORIGIN_TIMEOUT_SECS)
}

pub(crate) fn enabled() -> bool {
    true
}
