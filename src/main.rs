use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Result;
use tracing::{error, info};

use config::ServiceConfig;
use model_server::ModelService;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env()?;
    logging::init(config.log_format);
    config.log_summary();

    let service = Arc::new(ModelService::from_config(&config).await?);

    if config.preload {
        let preload = service.clone();
        tokio::spawn(async move {
            if let Err(e) = preload.ensure_loaded().await {
                error!("Error loading model: {}", e);
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    api_gateway::serve(addr, service, shutdown_signal()).await?;

    info!("Model server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
