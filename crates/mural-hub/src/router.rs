//! Axum router wiring and the serve loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;

use mural_core::error::{MuralError, Result};

use crate::config::HubConfig;
use crate::state::{Hub, SharedHub};
use crate::{ops, ws};

pub fn build_router(hub: SharedHub) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/ws", get(ws::ws_upgrade))
        .route("/healthz", get(ops::healthz))
        .route("/metrics", get(ops::metrics))
        .with_state(hub)
}

async fn home() -> &'static str {
    "mural hub"
}

/// Run the hub until ctrl-c.
pub async fn serve(cfg: HubConfig) -> Result<()> {
    let listen: SocketAddr = cfg
        .hub
        .listen
        .parse()
        .map_err(|e| MuralError::Config(format!("hub.listen: {e}")))?;
    let hub = Arc::new(Hub::new(cfg)?);

    tracing::info!(%listen, image_dir = %hub.cache().dir().display(), "mural hub starting");
    let listener = TcpListener::bind(listen).await?;
    let app = build_router(hub).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Run the hub on an already-bound listener (tests use an ephemeral port).
pub async fn serve_with_listener(listener: TcpListener, hub: SharedHub) -> Result<()> {
    let app = build_router(hub).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("installing ctrl-c handler: {e}");
        return;
    }
    tracing::info!("shutdown signal received");
}
