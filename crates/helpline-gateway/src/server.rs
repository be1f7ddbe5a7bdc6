//! Axum HTTP server: telephony webhooks, the media WebSocket and health.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::media_stream::media_handler;
use crate::state::AppState;
use crate::voice;

/// All routes, sharing one state.
pub fn router(state: Arc<AppState>) -> Router {
    let app = Router::new()
        .route("/voice/incoming", post(voice::incoming))
        .route("/voice/gather", post(voice::gather))
        .route("/voice/no-input", post(voice::no_input))
        .route("/voice/status", post(voice::status))
        .route("/media", get(media_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve until Ctrl+C, then flush the cost ledger.
pub async fn start_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr(), state.config.port());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Help desk listening on {addr}");
    match state.config.media_stream_url() {
        Some(url) => info!(media_url = %url, "Media streams are directed here"),
        None => warn!("No public host configured; media streams point at localhost"),
    }

    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.ledger.flush().await;
    info!("Cost ledger flushed");
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "active_calls": state.registry.len(),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => axum::http::StatusCode::NOT_FOUND.into_response(),
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to install Ctrl+C handler; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
