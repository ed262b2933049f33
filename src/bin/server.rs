//! Eury API server binary

use anyhow::{Context, Result};
use eury::api::{create_router, ApiState};
use eury::{ConsoleConfig, HttpBackend, QueueMonitor, TrainingSession};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Eury Server v{}", env!("CARGO_PKG_VERSION"));

    // Config file is optional; defaults point at a local backend
    let config = match std::env::args().nth(1) {
        Some(config_path) => ConsoleConfig::load(&config_path)
            .with_context(|| format!("Failed to load config file: {}", config_path))?,
        None => ConsoleConfig::default(),
    }
    .with_env_overrides();

    info!(
        backend_url = %config.backend_url,
        queue_poll_secs = config.queue_poll_secs,
        "Loaded configuration"
    );

    let backend = Arc::new(HttpBackend::new(&config).context("Failed to create HTTP client")?);

    // Start queue polling task
    let queue = Arc::new(QueueMonitor::new(backend.clone()));
    queue.clone().start(config.queue_poll_secs);

    let session = Arc::new(TrainingSession::new(backend));
    let state = Arc::new(ApiState::new(session, queue, config.label_table()));

    // Create router
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.listen_addr))?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
