//! Inference service
//!
//! Serves predictions from the registry's production model, reloads it after
//! retraining, and launches training jobs on request.

use anyhow::{Context, Result};
use inference_service::{api, config::ServiceConfig};
use mlops_lib::{registry::FileRegistry, serving::ModelService};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ServiceConfig::load()?;
    info!(
        model = %config.model_name,
        registry_root = %config.registry_root.display(),
        launcher = ?config.launcher,
        "Service configured"
    );

    // opened lazily: an unmounted registry degrades the service instead of failing startup
    let registry = Arc::new(FileRegistry::new(&config.registry_root));
    let launcher = config.launcher().context("Invalid trainer launcher settings")?;

    let service = ModelService::new(config.serving(), registry, launcher);
    service.initialize().await;
    service
        .logger()
        .log_startup(SERVICE_VERSION, &config.model_name, config.api_port);

    let state = Arc::new(api::AppState::new(service.clone()));
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    api::serve(config.api_port, state, shutdown).await?;

    service.logger().log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}
