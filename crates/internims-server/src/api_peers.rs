//! Read-only views of the registry.

use crate::api::ApiError;
use crate::AppState;
use axum::extract::{Extension, Json, Path};
use chrono::Utc;
use internims_registry::{
    get_live_peer, list_history, list_live_peers, remotes_overview, PeerHistoryRecord, PeerView,
    RemotesOverview,
};
use serde::Serialize;
use std::sync::Arc;

/// Response body for `GET /api/peers`.
#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub sites: Vec<PeerView>,
    pub num_sites: usize,
}

/// Response body for `GET /api/history/{siteId}`.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub site_id: String,
    pub records: Vec<PeerHistoryRecord>,
}

/// Handler for `GET /api/peers`.
pub async fn list_peers_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<PeersResponse>, ApiError> {
    let peers = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let conn = state.pool.get()?;
        Ok(list_live_peers(&conn, Utc::now())?)
    })
    .await??;

    let sites: Vec<PeerView> = peers.iter().map(PeerView::from).collect();
    Ok(Json(PeersResponse {
        num_sites: sites.len(),
        sites,
    }))
}

/// Handler for `GET /api/peers/{siteId}`.
pub async fn get_peer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(site_id): Path<String>,
) -> Result<Json<PeerView>, ApiError> {
    let lookup_id = site_id.clone();
    let peer = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let conn = state.pool.get()?;
        Ok(get_live_peer(&conn, &lookup_id, Utc::now())?)
    })
    .await??;

    peer.map(|p| Json(PeerView::from(&p)))
        .ok_or_else(|| ApiError::NotFound(format!("no live peer {site_id}")))
}

/// Handler for `GET /api/remotes`.
pub async fn remotes_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<RemotesOverview>, ApiError> {
    let peers = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let conn = state.pool.get()?;
        Ok(list_live_peers(&conn, Utc::now())?)
    })
    .await??;

    Ok(Json(remotes_overview(&peers)))
}

/// Handler for `GET /api/history/{siteId}`.
pub async fn history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(site_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let lookup_id = site_id.clone();
    let records = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let conn = state.pool.get()?;
        Ok(list_history(&conn, &lookup_id)?)
    })
    .await??;

    if records.is_empty() {
        return Err(ApiError::NotFound(format!("no history for {site_id}")));
    }
    Ok(Json(HistoryResponse { site_id, records }))
}
