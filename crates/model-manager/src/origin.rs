//! Origin tier
//!
//! The origin is the authoritative model hub. It is consulted only when both
//! cache tiers miss, and it writes the model's files straight into the local
//! cache entry.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use common::error::{Error, Result};
use common::models::{ArtifactId, CacheKey};
use common::types::ArtifactSource;
use common::utils::{execute_with_timeout, safe_relative_path};
use security::CredentialProvider;
use storage_adapter::transfer::write_response;

use crate::artifact::LoadedArtifact;

/// Logged when the origin refuses an unauthenticated or under-privileged request
const AUTH_REQUIRED_MESSAGE: &str =
    "Failed to download model: Authentication required. Please provide a HuggingFace token for gated models.";

/// Hub response header naming the error
const ERROR_CODE_HEADER: &str = "x-error-code";

/// Error code the hub sends for repositories that do not exist
const REPO_NOT_FOUND: &str = "RepoNotFound";

/// Extensions of weights for runtimes other than the one served here
const FOREIGN_WEIGHT_EXTENSIONS: &[&str] = &[
    "h5", "msgpack", "ot", "onnx", "onnx_data", "tflite", "mlmodel", "gguf", "ggml", "pb", "ckpt",
];

/// Files the hub keeps for humans or git
const SKIPPED_FILES: &[&str] = &[".gitattributes", ".gitignore"];

/// Source of model files
#[async_trait]
pub trait OriginSource: Send + Sync {
    /// Name used in log lines
    fn name(&self) -> &str;

    /// Writes every file of `id` into `destination`
    ///
    /// Returns the number of files written. Access refusals should be
    /// reported as `Error::AuthRequired`.
    async fn materialize(&self, id: &ArtifactId, destination: &Path, credential: Option<&str>) -> Result<usize>;
}

/// Fetches artifacts from an origin into the local cache
pub struct OriginFetcher {
    /// Where the files come from
    source: Arc<dyn OriginSource>,

    /// Optional origin credential
    credentials: Option<Arc<dyn CredentialProvider>>,

    /// Credential resolved on first use
    credential: OnceCell<Option<String>>,

    /// Bound on a whole fetch
    timeout: Duration,

    /// Manifest file name
    manifest_file: String,
}

impl OriginFetcher {
    /// Create a new fetcher
    pub fn new(source: Arc<dyn OriginSource>, timeout: Duration, manifest_file: impl Into<String>) -> Self {
        Self {
            source,
            credentials: None,
            credential: OnceCell::new(),
            timeout,
            manifest_file: manifest_file.into(),
        }
    }

    /// Attaches a credential provider
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Origin name
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Resolves the origin credential once
    ///
    /// A provider failure is logged and the fetch continues anonymously; the
    /// provider is asked again on the next fetch.
    async fn credential(&self) -> Option<String> {
        let provider = self.credentials.as_ref()?;

        match self.credential.get_or_try_init(|| provider.credential()).await {
            Ok(credential) => {
                if credential.is_some() {
                    info!("Using origin credential from {}", provider.name());
                } else {
                    info!("No origin credential configured, continuing without authentication");
                }
                credential.clone()
            }
            Err(e) => {
                warn!("Failed to read origin credential from {}: {}", provider.name(), e);
                None
            }
        }
    }

    /// Fetches `id` into `destination` and loads it
    pub async fn fetch(&self, id: &ArtifactId, key: &CacheKey, destination: &Path) -> Result<LoadedArtifact> {
        let credential = self.credential().await;

        info!("Fetching model {} from {}", id, self.name());
        let fetched = execute_with_timeout(
            self.source.materialize(id, destination, credential.as_deref()),
            self.timeout,
            "origin fetch",
        )
        .await
        .map_err(classify);

        let count = match fetched {
            Ok(count) => count,
            Err(e) => {
                if e.is_auth_required() {
                    error!("{}", AUTH_REQUIRED_MESSAGE);
                } else {
                    error!("Failed to fetch model {} from {}: {}", id, self.name(), e);
                }
                return Err(e);
            }
        };

        if !destination.join(&self.manifest_file).is_file() {
            return Err(Error::Fetch(format!(
                "{} did not provide {} for {}",
                self.name(),
                self.manifest_file,
                id
            )));
        }

        info!("Fetched {} files for {} from {}", count, id, self.name());
        LoadedArtifact::open(
            id.clone(),
            key.clone(),
            destination.to_path_buf(),
            &self.manifest_file,
            ArtifactSource::Origin,
        )
        .await
    }
}

/// Treats messages that mention token access as an authentication failure
fn classify(err: Error) -> Error {
    match err {
        Error::Fetch(message) | Error::ExternalService(message) => {
            let lower = message.to_lowercase();
            if lower.contains("token") && lower.contains("access") {
                Error::AuthRequired(message)
            } else {
                Error::Fetch(message)
            }
        }
        other => other,
    }
}

/// Default hub endpoint
pub const HUB_ENDPOINT: &str = "https://huggingface.co";

#[derive(Debug, Deserialize)]
struct ModelInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

/// Model hub over HTTP
///
/// Lists a revision's files through the model info API and downloads each
/// one from its `resolve` URL.
pub struct HubOrigin {
    /// HTTP client
    client: Client,

    /// Hub base URL
    endpoint: Url,

    /// Revision to fetch
    revision: String,

    /// Manifest file name, downloaded last
    manifest_file: String,
}

impl HubOrigin {
    /// Create a new hub origin
    pub fn new(endpoint: &str, revision: impl Into<String>, manifest_file: impl Into<String>) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid hub endpoint {}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid hub endpoint {}", endpoint)));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            revision: revision.into(),
            manifest_file: manifest_file.into(),
        })
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn info_url(&self, id: &ArtifactId) -> Url {
        let segments = ["api", "models"]
            .into_iter()
            .chain(id.segments())
            .chain(["revision", self.revision.as_str()]);
        self.url(segments)
    }

    fn file_url(&self, id: &ArtifactId, file: &str) -> Url {
        let segments = id
            .segments()
            .chain(["resolve", self.revision.as_str()])
            .chain(file.split('/'));
        self.url(segments)
    }

    async fn get(&self, url: Url, id: &ArtifactId, credential: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("request to {} failed: {}", url, e)))?;

        let repo_missing = response
            .headers()
            .get(ERROR_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            == Some(REPO_NOT_FOUND);

        match response.status() {
            status if status.is_success() => Ok(response),
            // Anonymous requests for unknown repositories are answered with 401.
            status if repo_missing => Err(Error::Fetch(format!(
                "{} was not found on {} ({}), check the model name",
                id,
                self.endpoint,
                status
            ))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthRequired(format!(
                "{} requires an access token ({})",
                id,
                response.status()
            ))),
            status => Err(Error::Fetch(format!("{} returned {}", url, status))),
        }
    }

    async fn list_files(&self, id: &ArtifactId, credential: Option<&str>) -> Result<Vec<String>> {
        let info: ModelInfo = self
            .get(self.info_url(id), id, credential)
            .await?
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("invalid model info for {}: {}", id, e)))?;

        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }
}

#[async_trait]
impl OriginSource for HubOrigin {
    fn name(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn materialize(&self, id: &ArtifactId, destination: &Path, credential: Option<&str>) -> Result<usize> {
        let mut files = self.list_files(id, credential).await?;
        files.retain(|file| {
            let safe = safe_relative_path(file).is_some();
            if !safe {
                warn!("Skipping hub file with unsafe name: {}", file);
            }
            safe
        });
        let mut files = select_files(files, &self.manifest_file);
        if files.is_empty() {
            return Err(Error::Fetch(format!("{} lists no files for {}", self.name(), id)));
        }

        files.sort();
        let manifest = self.manifest_file.as_str();
        files.sort_by_key(|file| file == manifest);

        for file in &files {
            let target = file.split('/').fold(destination.to_path_buf(), |path, segment| path.join(segment));
            let response = self.get(self.file_url(id, file), id, credential).await?;
            let written = write_response(response, &target, Error::Fetch).await?;
            debug!("Downloaded {} ({} bytes)", file, written);
        }

        Ok(files.len())
    }
}

/// Keeps the files a model load needs
///
/// Documentation, git metadata and weights for other frameworks are dropped.
/// When safetensors weights exist, pickled `pytorch_model*.bin` weights are
/// dropped too. The manifest is always kept.
fn select_files(files: Vec<String>, manifest: &str) -> Vec<String> {
    let has_safetensors = files.iter().any(|file| file.ends_with(".safetensors"));

    files
        .into_iter()
        .filter(|file| {
            if file == manifest {
                return true;
            }

            let name = file.rsplit('/').next().unwrap_or(file);
            let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
            let keep = !SKIPPED_FILES.contains(&name)
                && !name.to_ascii_lowercase().starts_with("readme")
                && !extension.as_deref().map_or(false, |ext| ext == "md" || FOREIGN_WEIGHT_EXTENSIONS.contains(&ext))
                && !(has_safetensors && name.starts_with("pytorch_model") && name.ends_with(".bin"));

            if !keep {
                debug!("Skipping hub file {}", file);
            }
            keep
        })
        .collect()
}
