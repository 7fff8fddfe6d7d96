//! Environment-backed service configuration
//!
//! Settings are read from environment variables through the `config` crate
//! and deserialized into [`ServiceConfig`]. Variable names are matched
//! case-insensitively (`MODEL_ID` fills `model_id`). Empty variables count as
//! unset.

use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::error::{Error, Result};
use common::models::ArtifactId;
use logging::LogFormat;

use crate::defaults;

/// Remote blob-store back end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobStoreKind {
    /// Google Cloud Storage JSON API
    #[default]
    Gcs,
    /// A directory treated as a bucket
    Filesystem,
}

/// Settings consumed by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Artifact to serve (`MODEL_ID`)
    pub model_id: ArtifactId,

    /// Remote bucket (`BUCKET_NAME`); `None` disables the remote tier
    pub bucket_name: Option<String>,

    /// Local cache root (`CACHE_DIR`)
    #[serde(default = "defaults::cache_dir")]
    pub cache_dir: PathBuf,

    /// Secret holding the origin credential (`secret-name` or `SECRET_NAME`)
    #[serde(alias = "secret-name")]
    pub secret_name: Option<String>,

    /// Project that owns the secret (`PROJECT_ID`)
    pub project_id: Option<String>,

    /// Origin credential given directly (`HF_TOKEN`)
    pub hf_token: Option<String>,

    /// HTTP listen port (`PORT`)
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Remote back end (`BLOB_STORE`)
    #[serde(default)]
    pub blob_store: BlobStoreKind,

    /// Storage emulator base URL (`STORAGE_EMULATOR_HOST`)
    pub storage_emulator_host: Option<String>,

    /// Origin base URL (`HF_ENDPOINT`)
    #[serde(default = "defaults::hf_endpoint")]
    pub hf_endpoint: String,

    /// Origin revision (`HF_REVISION`)
    #[serde(default = "defaults::hf_revision")]
    pub hf_revision: String,

    /// Per-call remote timeout (`REMOTE_TIMEOUT_SECS`)
    #[serde(rename = "remote_timeout_secs", with = "seconds", default = "defaults::remote_timeout")]
    pub remote_timeout: Duration,

    /// Origin fetch timeout (`ORIGIN_TIMEOUT_SECS`)
    #[serde(rename = "origin_timeout_secs", with = "seconds", default = "defaults::origin_timeout")]
    pub origin_timeout: Duration,

    /// Upload after the load completes instead of inline (`BACKGROUND_WRITE_BACK`)
    #[serde(default = "defaults::enabled")]
    pub background_write_back: bool,

    /// Start loading at startup instead of on first request (`PRELOAD`)
    #[serde(default = "defaults::enabled")]
    pub preload: bool,

    /// Log output format (`LOG_FORMAT`)
    #[serde(default)]
    pub log_format: LogFormat,
}

impl ServiceConfig {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_source(cfg::Environment::default())
    }

    /// Reads the configuration from the given variables instead of the
    /// process environment
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: cfg::Map<String, String> = vars
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();

        Self::from_source(cfg::Environment::default().source(Some(vars)))
    }

    fn from_source(source: cfg::Environment) -> Result<Self> {
        let config: Self = cfg::Config::builder()
            .add_source(source.ignore_empty(true))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.cache_dir.is_absolute() {
            return Err(Error::Config(format!(
                "CACHE_DIR must be an absolute path, got {}",
                self.cache_dir.display()
            )));
        }

        if self.remote_timeout.is_zero() || self.origin_timeout.is_zero() {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }

        Ok(())
    }

    /// Logs the effective configuration, with secrets redacted
    pub fn log_summary(&self) {
        info!(
            "Starting service with MODEL_ID: {}, BUCKET: {}, CACHE_DIR: {}",
            self.model_id,
            self.bucket_name.as_deref().unwrap_or("<none>"),
            self.cache_dir.display()
        );
        debug!("Service configuration: {:?}", self.redacted());
    }

    /// Returns a copy safe to log
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.hf_token.is_some() {
            copy.hf_token = Some("<redacted>".to_string());
        }
        copy
    }
}

/// Whole seconds as a `Duration`
mod seconds {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
