//! Request handlers

use std::sync::Arc;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use common::types::LoadState;

/// Default output bound for `/generate/`
pub const DEFAULT_MAX_LENGTH: usize = 100;

/// What the HTTP layer needs from the model service
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Identifier of the served model
    fn model_id(&self) -> String;

    /// Current load state of the served model
    fn status(&self) -> LoadState;

    /// Generates text, loading the model first if needed
    async fn generate(&self, text: &str, max_length: usize) -> common::Result<String>;
}

/// Shared handle to the service
pub type SharedService = Arc<dyn GenerationService>;

/// Body of `POST /generate/`
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Prompt
    #[serde(default)]
    pub text: String,

    /// Output bound in tokens
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

/// Response of `POST /generate/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub generated_text: String,
}

/// Response of a healthy `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
}

/// Error body: `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

/// `POST /generate/`
pub async fn generate(
    State(service): State<SharedService>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    debug!("Generating up to {} tokens", request.max_length);

    match service.generate(&request.text, request.max_length).await {
        Ok(generated_text) => Ok(Json(GenerateResponse { generated_text })),
        Err(e) => {
            error!("Error generating text: {}", e);
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// `GET /health`
pub async fn health(State(service): State<SharedService>) -> Result<Json<HealthResponse>, ApiError> {
    if service.status() != LoadState::Loaded {
        return Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Model not loaded"));
    }

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        model: service.model_id(),
    }))
}
