//! HTTP facade for the sharded document store: data CRUD/query,
//! transaction lifecycle, and shard-manager endpoints.

pub mod client;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod resolver;
pub mod rest;
pub mod state;

pub use rest::build_router;
pub use state::AppState;

use shardb_core::{Error, Result, ShardbConfig};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Boots the ShardB API: bootstraps an in-memory deployment, recovers any
/// in-flight transactions from durable state, and serves the router.
pub async fn run_server() -> Result<()> {
    let config = ShardbConfig::load().map_err(|e| Error::Internal(e.to_string()))?;

    let node_count: usize = std::env::var("SHARDB_NODE_COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);

    let state = AppState::bootstrap(config, node_count);
    let recovered = state.coordinator.recover().await?;
    if !recovered.is_empty() {
        info!(count = recovered.len(), "recovered in-flight transactions on startup");
    }

    let app = build_router(state);

    let bind_address = std::env::var("SHARDB_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| Error::InvalidRequest(format!("invalid bind address '{bind_address}': {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind to {addr}: {e}")))?;

    info!(%addr, "shardb-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))?;

    info!("shardb-api shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received CTRL+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
