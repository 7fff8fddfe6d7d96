//! Router and server

use std::future::Future;
use std::net::SocketAddr;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{generate, health, SharedService};

/// Builds the API router
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/generate/", post(generate))
        .route("/generate", post(generate))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serves the API on `addr` until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, service: SharedService, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Listening on {}", addr);

    axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {}", addr))?
        .serve(router(service).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}
