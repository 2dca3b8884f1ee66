// Main entry point for the harvest job supervisor

use std::sync::Arc;

use anyhow::{Context, Result};
use harvest_server::{
    kernel::jobs::{Supervisor, UnitCatalog},
    server::build_app,
    Config,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvest_server=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting harvest job supervisor");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Load unit catalog
    let catalog = UnitCatalog::load(&config.catalog_path).context("Failed to load unit catalog")?;
    tracing::info!(units = ?catalog.names(), "Unit catalog loaded");

    std::fs::create_dir_all(&config.output_dir).context("Failed to create output directory")?;

    // Build application
    let supervisor = Arc::new(Supervisor::new(catalog, config.supervisor_options()));
    let app = build_app(supervisor);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
