use anyhow::{Context, Result};
use browser_service::api::start_api_server;
use browser_service::config::{Config, StoreBackend};
use browser_service::{
    AppState, BackendClient, Catalog, CatalogStore, ImageResolver, MemoryCatalogStore,
    ObjectSource, PgCatalogStore, S3ObjectSource,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        store = ?config.database.backend,
        "Starting VBS Browser Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = open_store(&config).await?;

    let cdn: Option<Arc<dyn ObjectSource>> = if config.cdn.enabled {
        Some(Arc::new(
            S3ObjectSource::new(&config.cdn)
                .await
                .context("Failed to initialize CDN object source")?,
        ))
    } else {
        info!("CDN disabled, images fall back to placeholders");
        None
    };

    let backend = BackendClient::new(&config.backend).context("Failed to initialize backend client")?;
    info!(base_url = %backend.base_url(), "Backend client ready");

    let state = AppState {
        catalog: Catalog::new(store.clone(), config.query_timeout()),
        backend: Arc::new(backend),
        images: Arc::new(ImageResolver::new(
            config.images.root.clone(),
            cdn,
            config.images.placeholder_max_age_secs,
        )),
    };

    info!("Browser service started successfully");

    if let Err(e) = start_api_server(state, &config.api, shutdown_signal()).await {
        error!(error = %format!("{e:#}"), "API server error");
    }

    info!("Shutting down browser service");

    store.close().await;

    info!("Browser service stopped");

    Ok(())
}

/// Build the configured catalog store
async fn open_store(config: &Config) -> Result<Arc<dyn CatalogStore>> {
    match config.database.backend {
        StoreBackend::Postgres => {
            let store = PgCatalogStore::new(&config.database)
                .await
                .context("Failed to initialize catalog store")?;

            if config.database.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }

            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            let path = config
                .database
                .snapshot_path
                .as_deref()
                .context("database.snapshot_path is required for the memory store")?;

            let store = MemoryCatalogStore::from_snapshot(path)
                .await
                .context("Failed to load catalog snapshot")?;

            Ok(Arc::new(store))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

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
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
