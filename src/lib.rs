//! Model server
//!
//! Wires configuration, credentials, the cache tiers, the loader and a text
//! generator into the [`ModelService`] that the HTTP API serves.

use std::sync::Arc;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use api_gateway::GenerationService;
use common::models::ArtifactId;
use common::types::LoadState;
use config::defaults::MANIFEST_FILE;
use config::{BlobStoreKind, ServiceConfig};
use inference_engine::{EchoGenerator, TextGenerator};
use model_manager::{ArtifactLoader, HubOrigin, LoadedArtifact, LocalCacheStore, OriginFetcher, RemoteBlobStore};
use security::{AdcTokenSource, CredentialProvider, EnvCredentialProvider, SecretManagerProvider, TokenSource};
use storage_adapter::{BlobStore, FilesystemBlobStore, GcsBlobStore};

/// The served model and everything needed to load and run it
pub struct ModelService {
    /// Model ID
    model_id: ArtifactId,

    /// Tiered loader
    loader: ArtifactLoader,

    /// Text generation backend
    generator: Arc<dyn TextGenerator>,
}

impl ModelService {
    /// Creates a service from already built parts
    pub fn new(model_id: ArtifactId, loader: ArtifactLoader, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            model_id,
            loader,
            generator,
        }
    }

    /// Builds the service described by `config`
    ///
    /// Fails if the local cache root cannot be created or written.
    pub async fn from_config(config: &ServiceConfig) -> Result<Self> {
        let local = LocalCacheStore::new(config.cache_dir.clone(), MANIFEST_FILE);
        local.ensure_root().await.context("local cache is unusable")?;

        let cloud_tokens: Arc<dyn TokenSource> = Arc::new(AdcTokenSource::new());

        let remote = remote_store(config, cloud_tokens.clone())?;
        let origin = origin_fetcher(config, cloud_tokens)?;

        let loader = ArtifactLoader::builder(local, origin)
            .maybe_remote(remote)
            .background_write_back(config.background_write_back)
            .build();

        let generator: Arc<dyn TextGenerator> = Arc::new(EchoGenerator);
        info!("Text generation backend: {}", generator.name());

        Ok(Self::new(config.model_id.clone(), loader, generator))
    }

    /// Served model
    pub fn model_id(&self) -> &ArtifactId {
        &self.model_id
    }

    /// Underlying loader
    pub fn loader(&self) -> &ArtifactLoader {
        &self.loader
    }

    /// Loads the model if it is not loaded yet
    pub async fn ensure_loaded(&self) -> common::Result<Arc<LoadedArtifact>> {
        self.loader.ensure_loaded(&self.model_id).await
    }

    /// Returns the loaded model, or `Error::NotLoaded`
    pub fn use_artifact(&self) -> common::Result<Arc<LoadedArtifact>> {
        self.loader.artifact(&self.model_id)
    }

    /// Load state of the model
    pub fn status(&self) -> LoadState {
        self.loader.status(&self.model_id)
    }

    /// Returns true once the model is loaded
    pub fn is_ready(&self) -> bool {
        self.status().is_loaded()
    }

    /// Generates text, loading the model first if needed
    pub async fn generate(&self, text: &str, max_length: usize) -> common::Result<String> {
        let artifact = self.ensure_loaded().await?;
        self.generator.generate(&artifact, text, max_length).await
    }
}

#[async_trait]
impl GenerationService for ModelService {
    fn model_id(&self) -> String {
        self.model_id.to_string()
    }

    fn status(&self) -> LoadState {
        ModelService::status(self)
    }

    async fn generate(&self, text: &str, max_length: usize) -> common::Result<String> {
        ModelService::generate(self, text, max_length).await
    }
}

fn remote_store(config: &ServiceConfig, cloud_tokens: Arc<dyn TokenSource>) -> Result<Option<RemoteBlobStore>> {
    let bucket = match &config.bucket_name {
        Some(bucket) => bucket,
        None => {
            info!("No BUCKET_NAME configured, remote cache disabled");
            return Ok(None);
        }
    };

    let store: Arc<dyn BlobStore> = match config.blob_store {
        BlobStoreKind::Gcs => match &config.storage_emulator_host {
            Some(host) => {
                info!("Using storage emulator at {}", host);
                Arc::new(GcsBlobStore::new(bucket.as_str(), None)?.with_endpoint(host.as_str()))
            }
            None => Arc::new(GcsBlobStore::new(bucket.as_str(), Some(cloud_tokens))?),
        },
        BlobStoreKind::Filesystem => Arc::new(FilesystemBlobStore::new(bucket.as_str())),
    };

    info!("Remote cache at {}", store.location());
    Ok(Some(RemoteBlobStore::new(store, config.remote_timeout, MANIFEST_FILE)))
}

fn origin_fetcher(config: &ServiceConfig, cloud_tokens: Arc<dyn TokenSource>) -> Result<OriginFetcher> {
    let hub = HubOrigin::new(&config.hf_endpoint, config.hf_revision.as_str(), MANIFEST_FILE)?;
    let fetcher = OriginFetcher::new(Arc::new(hub), config.origin_timeout, MANIFEST_FILE);

    let provider: Option<Arc<dyn CredentialProvider>> = match (&config.hf_token, &config.secret_name, &config.project_id) {
        (Some(token), _, _) => Some(Arc::new(EnvCredentialProvider::new(Some(token.clone())))),
        (None, Some(secret), Some(project)) => Some(Arc::new(SecretManagerProvider::new(
            project.as_str(),
            secret.as_str(),
            cloud_tokens,
        )?)),
        (None, Some(secret), None) => {
            warn!("Secret {} is configured without PROJECT_ID, continuing without authentication", secret);
            None
        }
        _ => None,
    };

    Ok(match provider {
        Some(provider) => {
            info!("Origin credential from {}", provider.name());
            fetcher.with_credentials(provider)
        }
        None => {
            info!("No origin credential configured, continuing without authentication");
            fetcher
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(vars: &[(&str, String)]) -> ServiceConfig {
        ServiceConfig::from_vars(vars.iter().map(|(k, v)| (k.to_string(), v.clone()))).unwrap()
    }

    fn write_model(entry: &Path) {
        std::fs::create_dir_all(entry).unwrap();
        std::fs::write(entry.join("config.json"), r#"{"model_type":"echo"}"#).unwrap();
        std::fs::write(entry.join("weights.bin"), vec![1u8; 8]).unwrap();
    }

    #[tokio::test]
    async fn test_generate_loads_from_local_cache() {
        let cache = TempDir::new().unwrap();
        write_model(&cache.path().join("acme--widget"));

        let config = config(&[
            ("MODEL_ID", "acme/widget".to_string()),
            ("CACHE_DIR", cache.path().display().to_string()),
        ]);
        let service = ModelService::from_config(&config).await.unwrap();

        assert_eq!(service.status(), LoadState::Unloaded);
        assert!(!service.is_ready());
        assert!(service.use_artifact().unwrap_err().is_not_loaded());

        let text = service.generate("the quick brown fox", 2).await.unwrap();
        assert_eq!(text, "the quick");
        assert!(service.is_ready());
        assert_eq!(service.use_artifact().unwrap().files.len(), 2);
    }

    #[tokio::test]
    async fn test_filesystem_remote_tier() {
        let cache = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        write_model(&bucket.path().join("models").join("acme--widget"));

        let config = config(&[
            ("MODEL_ID", "acme/widget".to_string()),
            ("CACHE_DIR", cache.path().display().to_string()),
            ("BUCKET_NAME", bucket.path().display().to_string()),
            ("BLOB_STORE", "filesystem".to_string()),
        ]);
        let service = ModelService::from_config(&config).await.unwrap();
        assert!(service.loader().has_remote());

        let artifact = service.ensure_loaded().await.unwrap();
        assert_eq!(artifact.source, common::types::ArtifactSource::Remote);
        assert_eq!(GenerationService::model_id(&service), "acme/widget");
    }

    #[tokio::test]
    async fn test_secret_without_project_starts_unauthenticated() {
        let cache = TempDir::new().unwrap();
        write_model(&cache.path().join("acme--widget"));

        let config = config(&[
            ("MODEL_ID", "acme/widget".to_string()),
            ("CACHE_DIR", cache.path().display().to_string()),
            ("secret-name", "hf-token".to_string()),
        ]);
        let service = ModelService::from_config(&config).await.unwrap();

        let artifact = service.ensure_loaded().await.unwrap();
        assert_eq!(artifact.source, common::types::ArtifactSource::Local);
    }

    #[tokio::test]
    async fn test_unwritable_cache_root_is_fatal() {
        let scratch = TempDir::new().unwrap();
        let file = scratch.path().join("file");
        std::fs::write(&file, "x").unwrap();

        let config = config(&[
            ("MODEL_ID", "acme/widget".to_string()),
            ("CACHE_DIR", file.join("cache").display().to_string()),
        ]);
        assert!(ModelService::from_config(&config).await.is_err());
    }
}
