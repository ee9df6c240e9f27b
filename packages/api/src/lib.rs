// ABOUTME: HTTP transport layer for Capsule: JSON-RPC endpoint, terminal bridge, health
// ABOUTME: The router is shared between production startup and tests

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use capsule_sandbox::DockerProvider;

pub mod rpc;
pub mod terminal;

/// Shared state for all transport handlers
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<DockerProvider>,
}

/// Build the transport router: `POST /rpc`, `GET /terminal/{sandbox_id}`,
/// `GET /health`.
pub fn create_router(provider: Arc<DockerProvider>) -> Router {
    Router::new()
        .route("/rpc", post(rpc::handle_rpc))
        .route("/terminal/{sandbox_id}", get(terminal::terminal_handler))
        .route("/health", get(health))
        // the 2 MiB request contract is enforced inside the rpc handler so
        // oversized bodies still get a JSON-RPC envelope; this outer limit
        // only bounds what axum will buffer
        .layer(DefaultBodyLimit::max(4 * 1024 * 1024))
        .with_state(AppState { provider })
}

async fn health() -> &'static str {
    "ok"
}
