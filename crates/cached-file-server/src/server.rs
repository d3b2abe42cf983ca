//! HTTP server wiring for the standalone binary
//!
//! Provides /health plus the cached file server mounted at its route.

use crate::file_server::FileServer;
use crate::types::HealthResponse;
use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

/// Shared state for the HTTP server
pub struct ServerState {
    pub file_server: FileServer<ServeDir>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(file_server: FileServer<ServeDir>) -> Self {
        Self {
            file_server,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let files = state.file_server.handle();
    let mount = state.file_server.route().trim_end_matches('/');

    let router = Router::new().route("/health", get(health));
    let router = if mount.is_empty() {
        router.fallback_service(files)
    } else {
        // the bare mount serves the directory index
        router
            .route_service(mount, files.clone())
            .route_service(&format!("{}/", mount), files.clone())
            .route_service(&format!("{}/{{*path}}", mount), files)
    };

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.file_server.stats(),
    })
}
