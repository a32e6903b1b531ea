use anyhow::{Context, Result};
use photo_catalog::api::{start_api_server, AppState};
use photo_catalog::catalog::PgCatalogStore;
use photo_catalog::config::Config;
use photo_catalog::notify::SesNotifier;
use photo_catalog::object_store::S3ObjectStore;
use photo_catalog::pipeline::Pipeline;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Photo Catalog Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize collaborators
    let catalog = Arc::new(
        PgCatalogStore::new(&config.catalog)
            .await
            .context("Failed to initialize catalog store")?,
    );

    if config.catalog.run_migrations {
        catalog
            .run_migrations()
            .await
            .context("Failed to run catalog migrations")?;
    }

    let objects = Arc::new(
        S3ObjectStore::new(&config.storage)
            .await
            .context("Failed to initialize object store")?,
    );

    let notifier = Arc::new(
        SesNotifier::new(&config.email)
            .await
            .context("Failed to initialize notifier")?,
    );

    // Wire the pipeline and its workers
    let pipeline = Arc::new(Pipeline::new(
        &config.queue,
        config.email.recipient.clone(),
        catalog,
        objects,
        notifier,
    ));

    // Spawn the ingest API server
    let api_state = AppState {
        pipeline: pipeline.clone(),
    };
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Photo catalog service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down photo catalog service");

    api_handle.abort();
    let _ = api_handle.await;
    match Arc::try_unwrap(pipeline) {
        Ok(pipeline) => pipeline.shutdown().await,
        Err(_) => warn!("pipeline handle still shared, skipping graceful drain"),
    }

    info!("Photo catalog service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
