//! Scheduled expiry sweeps.

use chrono::Utc;
use internims_db::DbPool;
use internims_registry::run_sweeps;
use tokio::time::{sleep, Duration};

/// Starts the scheduled sweep task.
///
/// Runs indefinitely, sweeping expired peers and history every
/// `interval_seconds`. Failures are logged and the loop carries on.
pub async fn start_sweep_task(pool: DbPool, interval_seconds: u64, history_threshold_days: i64) {
    if interval_seconds == 0 {
        tracing::warn!("sweep task disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting registry sweep task");

    loop {
        sleep(interval).await;

        let pool = pool.clone();
        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            run_sweeps(&conn, Utc::now(), history_threshold_days).map_err(|e| e.to_string())
        })
        .await;

        match res {
            Ok(Ok(report)) => {
                if report.is_empty() {
                    tracing::debug!("nothing to sweep");
                } else {
                    tracing::info!(
                        removed_peers = report.removed_peers.len(),
                        expired_history = report.expired_history.len(),
                        "scheduled sweep"
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("scheduled sweep failed: {}", e);
            }
            Err(e) => {
                tracing::error!("sweep task join error: {}", e);
            }
        }
    }
}
