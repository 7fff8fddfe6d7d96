//! Origin credentials
//!
//! The origin may gate an artifact behind a token. The token is optional: a
//! provider that yields `None` (or fails) means the fetch proceeds
//! unauthenticated, which is enough for ungated artifacts.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use common::error::{Error, Result};

use crate::token::TokenSource;

/// Secret manager API base URL
pub const SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com";

/// Supplies the origin credential, if any
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Short description for logs
    fn name(&self) -> &str;

    /// Returns the credential, or `None` when there is nothing to send
    async fn credential(&self) -> Result<Option<String>>;
}

/// Credential handed over directly through configuration
pub struct EnvCredentialProvider {
    token: Option<String>,
}

impl EnvCredentialProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    fn name(&self) -> &str {
        "environment"
    }

    async fn credential(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

#[derive(Deserialize)]
struct AccessSecretResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

/// Reads the latest version of a secret from the secret manager
pub struct SecretManagerProvider {
    /// HTTP client
    client: Client,

    /// API base URL
    endpoint: String,

    /// Project that owns the secret
    project_id: String,

    /// Secret name
    secret_name: String,

    /// Bearer token for the API call
    token_source: Arc<dyn TokenSource>,
}

impl SecretManagerProvider {
    /// Creates a provider for `projects/<project_id>/secrets/<secret_name>`
    pub fn new(
        project_id: impl Into<String>,
        secret_name: impl Into<String>,
        token_source: Arc<dyn TokenSource>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: SECRET_MANAGER_ENDPOINT.to_string(),
            project_id: project_id.into(),
            secret_name: secret_name.into(),
            token_source,
        })
    }

    /// Overrides the API base URL
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn version_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/secrets/{}/versions/latest:access",
            self.endpoint, self.project_id, self.secret_name
        )
    }
}

#[async_trait]
impl CredentialProvider for SecretManagerProvider {
    fn name(&self) -> &str {
        "secret-manager"
    }

    async fn credential(&self) -> Result<Option<String>> {
        info!("Credential configuration found, reading secret {}", self.secret_name);

        let access_token = self.token_source.access_token().await?;
        let url = self.version_url();
        debug!("Accessing secret version {}", url);

        let resp = self.client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::ExternalService(format!("Secret manager unreachable: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::ExternalService(format!(
                "Failed to access secret {}: HTTP {}",
                self.secret_name,
                resp.status()
            )));
        }

        let body: AccessSecretResponse = resp
            .json()
            .await
            .map_err(|e| Error::ExternalService(format!("Malformed secret response: {}", e)))?;

        let bytes = STANDARD
            .decode(body.payload.data.as_bytes())
            .map_err(|e| Error::ExternalService(format!("Secret payload is not base64: {}", e)))?;

        let secret = String::from_utf8(bytes)
            .map_err(|e| Error::ExternalService(format!("Secret payload is not UTF-8: {}", e)))?;

        let secret = secret.trim();
        if secret.is_empty() {
            Ok(None)
        } else {
            Ok(Some(secret.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use axum::{extract::Path, http::HeaderMap, http::StatusCode, routing::get, Json, Router};

    use crate::token::StaticTokenSource;

    async fn access(
        Path((project, rest)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer cloud-token") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        if project != "proj" || rest.trim_start_matches('/') != "hf-token/versions/latest:access" {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(Json(serde_json::json!({
            "name": "projects/proj/secrets/hf-token/versions/1",
            "payload": { "data": STANDARD.encode("hf_abc123\n") },
        })))
    }

    fn spawn_secret_manager() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/v1/projects/:project/secrets/*rest",
            get(access),
        );
        tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_env_provider() {
        assert_eq!(
            EnvCredentialProvider::new(Some("hf_x".into())).credential().await.unwrap(),
            Some("hf_x".to_string())
        );
        assert_eq!(EnvCredentialProvider::new(Some("  ".into())).credential().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_secret_manager_reads_and_trims() {
        let endpoint = spawn_secret_manager();
        let provider = SecretManagerProvider::new("proj", "hf-token", Arc::new(StaticTokenSource::new("cloud-token")))
            .unwrap()
            .with_endpoint(endpoint);

        assert_eq!(provider.credential().await.unwrap(), Some("hf_abc123".to_string()));
    }

    #[tokio::test]
    async fn test_secret_manager_missing_secret() {
        let endpoint = spawn_secret_manager();
        let provider = SecretManagerProvider::new("proj", "other", Arc::new(StaticTokenSource::new("cloud-token")))
            .unwrap()
            .with_endpoint(endpoint);

        let err = provider.credential().await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
