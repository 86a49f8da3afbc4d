//! Combined maintenance sweep.

use crate::history::sweep_expired_history;
use crate::peers::sweep_expired_peers;
use crate::RegistryError;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

/// What one sweep removed or closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed_peers: Vec<String>,
    pub expired_history: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.removed_peers.is_empty() && self.expired_history.is_empty()
    }
}

/// Runs the peer liveness sweep, then the history sweep, both against the
/// same `now`.
///
/// # Errors
///
/// Returns the first [`RegistryError`] hit. The peer sweep is committed even
/// if the history sweep then fails.
pub fn run_sweeps(
    conn: &Connection,
    now: DateTime<Utc>,
    history_threshold_days: i64,
) -> Result<SweepReport, RegistryError> {
    let removed_peers = sweep_expired_peers(conn, now)?;
    let expired_history = sweep_expired_history(conn, now, history_threshold_days)?;
    Ok(SweepReport {
        removed_peers,
        expired_history,
    })
}
