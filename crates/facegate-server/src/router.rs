use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::errors::{ServerError, ServerResult};
use crate::handlers;
use crate::state::AppState;

/// Largest accepted request body; uploads carry whole images.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/enroll",
            post(handlers::enroll).options(handlers::preflight),
        )
        .route(
            "/verify",
            post(handlers::verify).options(handlers::preflight),
        )
        .route(
            "/presign-upload",
            post(handlers::presign_upload).options(handlers::preflight),
        )
        .route(
            "/objects/{bucket}/{*key}",
            put(handlers::put_object).options(handlers::upload_preflight),
        )
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(addr: &str, state: Arc<AppState>) -> ServerResult<()> {
    info!(target: "server", "binding http server addr={addr}");
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    if let Ok(local) = listener.local_addr() {
        info!(target: "server", "accepting connections addr={local}");
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(target: "server", "shutdown requested"),
        Err(err) => warn!(target: "server", "failed to listen for ctrl-c: {err}"),
    }
}
