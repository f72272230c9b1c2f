//! Liveness endpoint served next to the polling gateway.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub(crate) const HEALTH_ENDPOINT: &str = "/healthz";

pub(crate) fn build_health_router() -> Router {
    Router::new().route(HEALTH_ENDPOINT, get(handle_healthz))
}

async fn handle_healthz() -> &'static str {
    "OK"
}

/// Binds `bind_addr` and serves the health router on a background task.
pub(crate) async fn start_health_server(
    bind_addr: SocketAddr,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind health server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound health server address")?;
    info!(addr = %local_addr, endpoint = HEALTH_ENDPOINT, "health server listening");

    let handle = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, build_health_router()).await {
            warn!(%error, "health server exited unexpectedly");
        }
    });
    Ok((local_addr, handle))
}
