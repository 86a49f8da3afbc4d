//! HTTP surface of the InterNIMS peer registry.
//!
//! Sites announce themselves with `POST /`; the handler authenticates the
//! announcement, checks the claimed endpoint, refreshes the registry and
//! history, and answers with the live peer set. Read-only views and a
//! maintenance sweep hang off `/api`.

pub mod api;
pub mod api_announce;
pub mod api_maintenance;
pub mod api_peers;
pub mod background;
pub mod config;
pub mod probe;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::RegistryConfig;
use internims_db::DbPool;
use probe::ReachabilityProbe;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub registry: RegistryConfig,
    pub probe: Arc<dyn ReachabilityProbe>,
}

/// Announcements are small JSON documents.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", post(api_announce::announce_handler))
        .route("/health", get(health))
        .route("/api/peers", get(api_peers::list_peers_handler))
        .route("/api/peers/{siteId}", get(api_peers::get_peer_handler))
        .route("/api/remotes", get(api_peers::remotes_handler))
        .route("/api/history/{siteId}", get(api_peers::history_handler))
        .route(
            "/api/maintenance/sweep",
            post(api_maintenance::sweep_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
