//! Listening server: inbound controllers over WebSocket
//!
//! Routes:
//! - `GET /health` - agent identity as JSON
//! - `GET /ws` - WebSocket upgrade; the first frame must be `hello` with
//!   the shared token

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;

use spectre_core::endpoint::{bind_address, AGENT_WS_PATH};
use spectre_protocol::MAX_FRAME_SIZE;

use crate::channel::ControlChannel;
use crate::connection::run_channel;
use crate::state::AgentState;
use crate::transport::axum_socket;

/// Build the router
pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(AGENT_WS_PATH, get(ws_handler))
        .with_state(state)
}

/// Bind the configured listen address (`:8081` binds every interface).
///
/// Failure here is fatal to the agent.
pub async fn bind(listen: &str) -> Result<TcpListener> {
    let addr = bind_address(listen);
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))
}

/// Serve until the agent's shutdown token fires
pub async fn serve(listener: TcpListener, state: Arc<AgentState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Listening on {}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server shutdown with error")
}

async fn health_handler(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    Json(state.health())
}

async fn ws_handler(
    State(state): State<Arc<AgentState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AgentState>) {
    let mut channel = ControlChannel::new(axum_socket(socket), &state.shutdown);

    if let Err(e) = channel
        .accept_handshake(
            &state.config.token,
            &state.hello(),
            state.config.handshake_timeout,
        )
        .await
    {
        tracing::warn!("Rejected inbound controller: {}", e);
        channel.close().await;
        return;
    }

    tracing::info!("Controller connected");
    let error = run_channel(channel, state).await;
    tracing::info!("Controller disconnected: {}", error);
}
