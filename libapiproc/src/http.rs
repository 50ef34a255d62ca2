//! Health probe and static index served next to the workers.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

/// Page served for every path other than the health probe
pub const INDEX_FILE: &str = "index.html";

#[derive(Clone)]
struct HttpState {
    static_dir: Arc<PathBuf>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Create the HTTP router
pub fn router(static_dir: impl Into<PathBuf>) -> Router {
    let state = HttpState {
        static_dir: Arc::new(static_dir.into()),
    };
    Router::new()
        .route("/health", get(health_check))
        .fallback(index)
        .with_state(state)
}

/// Serve the router on given address until the listener fails
pub async fn serve(addr: SocketAddr, static_dir: impl Into<PathBuf>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(static_dir)).await
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn index(State(state): State<HttpState>) -> Response {
    let path = state.static_dir.join(INDEX_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            error!("Failed to read {} - {}", path.display(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Unable to serve {}", INDEX_FILE),
            )
                .into_response()
        }
    }
}
