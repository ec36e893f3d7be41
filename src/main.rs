//! bidi - encrypted client/server substrate with push notifications
//!
//! Server daemon: serves requests until Ctrl+C or a SHUTDOWN request.

use bidi_server::{Config, DefaultApplication, Server, ServerState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if BIDI_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("BIDI_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("BIDI_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting bidi server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Public URL: {}", config.network.url);
    tracing::info!("  Home directory: {}", config.storage.home_dir.display());
    tracing::info!("  Max connections: {}", config.network.max_connections);

    let app = Arc::new(DefaultApplication::new());
    let state = Arc::new(ServerState::open(config, app)?);
    let server = Arc::new(Server::bind(Arc::clone(&state)).await?);

    // Spawn shutdown signal handler
    let shutdown_state = Arc::clone(&state);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_state.request_shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
