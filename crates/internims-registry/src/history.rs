//! Long-horizon presence ledger.
//!
//! `peer_history` keeps at most one open (`expired = 0`) row per site,
//! enforced by a partial unique index. Announcements refresh the open row;
//! a day of silence closes it. Closed rows are never reopened: the next
//! announcement after a close starts a new row.

use crate::RegistryError;
use chrono::{DateTime, Duration, Utc};
use internims_types::format_timestamp;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

const HISTORY_COLUMNS: &str = "id, site_id, created_at, modified_at, expiration, expired";

/// One presence interval of a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerHistoryRecord {
    pub id: i64,
    pub site_id: String,
    pub created_at: String,
    pub modified_at: String,
    pub expiration: Option<String>,
    pub expired: bool,
}

impl PeerHistoryRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            site_id: row.get(1)?,
            created_at: row.get(2)?,
            modified_at: row.get(3)?,
            expiration: row.get(4)?,
            expired: row.get(5)?,
        })
    }
}

/// The silence after which an open record is closed.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidThreshold`] for fewer than one day.
pub fn history_threshold(days: i64) -> Result<Duration, RegistryError> {
    if days < 1 {
        return Err(RegistryError::InvalidThreshold(days));
    }
    Ok(Duration::days(days))
}

/// Records an announcement from `site_id` at `now`.
///
/// An open record older than the threshold is closed first, so a site that
/// was silent for longer than the threshold always gets a fresh record even
/// if no sweep has run in between. Then the open record (if any) has its
/// `modified_at` refreshed, or a new one is created.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidThreshold`] for a bad threshold, or
/// [`RegistryError::Database`] if a write fails.
pub fn touch_history(
    conn: &Connection,
    site_id: &str,
    now: DateTime<Utc>,
    threshold_days: i64,
) -> Result<PeerHistoryRecord, RegistryError> {
    let now_ts = format_timestamp(now);
    let cutoff = format_timestamp(now - history_threshold(threshold_days)?);

    let closed = conn.execute(
        "UPDATE peer_history SET expired = 1, expiration = ?1
         WHERE site_id = ?2 AND expired = 0 AND modified_at < ?3",
        params![now_ts, site_id, cutoff],
    )?;
    if closed > 0 {
        tracing::info!(site_id, "closed stale history record before refresh");
    }

    let record = conn.query_row(
        &format!(
            "INSERT INTO peer_history (site_id, created_at, modified_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(site_id) WHERE expired = 0 DO UPDATE SET
                modified_at = excluded.modified_at
             RETURNING {HISTORY_COLUMNS}"
        ),
        params![site_id, now_ts],
        PeerHistoryRecord::from_row,
    )?;

    if record.created_at == record.modified_at {
        tracing::info!(site_id, id = record.id, "opened history record");
    }
    Ok(record)
}

/// Closes every open record not modified within the threshold, stamping
/// `expiration = now`. Returns the affected site ids, sorted.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidThreshold`] for a bad threshold, or
/// [`RegistryError::Database`] if the update fails.
pub fn sweep_expired_history(
    conn: &Connection,
    now: DateTime<Utc>,
    threshold_days: i64,
) -> Result<Vec<String>, RegistryError> {
    let cutoff = format_timestamp(now - history_threshold(threshold_days)?);
    let mut stmt = conn.prepare(
        "UPDATE peer_history SET expired = 1, expiration = ?1
         WHERE expired = 0 AND modified_at < ?2
         RETURNING site_id",
    )?;
    let mut expired = stmt
        .query_map(params![format_timestamp(now), cutoff], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    expired.sort();

    for site_id in &expired {
        tracing::info!(site_id, "history record expired");
    }
    Ok(expired)
}

/// The open record for `site_id`, if any.
///
/// # Errors
///
/// Returns [`RegistryError::Database`] if the query fails.
pub fn get_open_history(
    conn: &Connection,
    site_id: &str,
) -> Result<Option<PeerHistoryRecord>, RegistryError> {
    let record = conn
        .query_row(
            &format!("SELECT {HISTORY_COLUMNS} FROM peer_history WHERE site_id = ?1 AND expired = 0"),
            [site_id],
            PeerHistoryRecord::from_row,
        )
        .optional()?;
    Ok(record)
}

/// Every record for `site_id`, newest first.
///
/// # Errors
///
/// Returns [`RegistryError::Database`] if the query fails.
pub fn list_history(
    conn: &Connection,
    site_id: &str,
) -> Result<Vec<PeerHistoryRecord>, RegistryError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HISTORY_COLUMNS} FROM peer_history WHERE site_id = ?1 ORDER BY id DESC"
    ))?;
    let records = stmt
        .query_map([site_id], PeerHistoryRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}
