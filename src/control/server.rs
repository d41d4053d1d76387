//! HTTP front for the control channel.
//!
//! - `GET /socket` upgrades to the WebSocket control channel.
//! - `GET /health` returns `ok`.

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::control::connection;
use crate::orchestrator::registry::SessionRegistry;
use crate::{AppError, Result};

/// Shared state handed to every request.
#[derive(Debug, Clone)]
pub struct ControlState {
    /// Session registry.
    pub registry: SessionRegistry,
    /// Per-client event buffer.
    pub client_buffer: usize,
    /// Fires when open connections should close.
    pub ct: CancellationToken,
}

/// Build the control-plane router.
#[must_use]
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/socket", get(socket))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn socket(ws: WebSocketUpgrade, State(state): State<ControlState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_socket(socket, state.registry, state.client_buffer, state.ct)
    })
}

/// Serve the control channel on `listener` until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve(listener: TcpListener, state: ControlState) -> Result<()> {
    let ct = state.ct.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "control channel listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("control server error: {err}")))?;

    info!("control channel shut down");
    Ok(())
}
