//! `POST /api/maintenance/sweep`: run both expiry sweeps on demand.
//!
//! For deployments that sweep from an external scheduler instead of on every
//! announcement. Sweeps only ever remove state that is already past its
//! window, so repeated calls are harmless.

use crate::api::ApiError;
use crate::AppState;
use axum::extract::{Extension, Json};
use chrono::Utc;
use internims_registry::{run_sweeps, SweepReport};
use std::sync::Arc;

/// Handler for `POST /api/maintenance/sweep`.
pub async fn sweep_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<SweepReport>, ApiError> {
    let report = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let conn = state.pool.get()?;
        Ok(run_sweeps(
            &conn,
            Utc::now(),
            state.registry.history_threshold_days,
        )?)
    })
    .await??;

    tracing::info!(
        removed_peers = report.removed_peers.len(),
        expired_history = report.expired_history.len(),
        "maintenance sweep"
    );
    Ok(Json(report))
}
