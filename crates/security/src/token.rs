//! Cloud access tokens
//!
//! The blob store and the secret manager both authenticate with an OAuth
//! bearer token. Tokens come from Application Default Credentials: a service
//! account key named by `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud user
//! credentials, or the instance metadata server, tried in that order.

use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use common::error::{Error, Result};

/// OAuth scope covering Cloud Storage and Secret Manager
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Supplies bearer tokens for cloud API calls
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a currently valid access token
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, for emulators and tests
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Creates a token source that always returns `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Token source backed by Application Default Credentials
///
/// The credential chain is discovered on the first request, so a host
/// without cloud credentials only fails when a cloud API is actually used.
/// Tokens are cached and refreshed by the provider.
pub struct AdcTokenSource {
    /// Requested OAuth scopes
    scopes: Vec<String>,

    /// Provider found on first use
    provider: OnceCell<Arc<dyn gcp_auth::TokenProvider>>,
}

impl AdcTokenSource {
    /// Creates a token source for the cloud-platform scope
    pub fn new() -> Self {
        Self::with_scopes([CLOUD_PLATFORM_SCOPE])
    }

    /// Creates a token source for custom scopes
    pub fn with_scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            provider: OnceCell::new(),
        }
    }

    /// Requested OAuth scopes
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    async fn provider(&self) -> Result<&Arc<dyn gcp_auth::TokenProvider>> {
        self.provider
            .get_or_try_init(|| async {
                let provider = gcp_auth::provider()
                    .await
                    .map_err(|e| Error::ExternalService(format!("No cloud credentials found: {}", e)))?;
                info!("Using Application Default Credentials");
                Ok(provider)
            })
            .await
    }
}

impl Default for AdcTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenSource for AdcTokenSource {
    async fn access_token(&self) -> Result<String> {
        let provider = self.provider().await?;
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();

        debug!("Requesting access token for {:?}", scopes);
        let token = provider
            .token(&scopes)
            .await
            .map_err(|e| Error::ExternalService(format!("Failed to obtain access token: {}", e)))?;

        Ok(token.as_str().to_string())
    }
}
