//! Live peer snapshots.
//!
//! One row per site in `peers`. A row is live while `last_seen_at` is within
//! [`liveness_window`] of now; past that it is deleted outright by
//! [`sweep_expired_peers`], not flagged.
//!
//! Every age comparison uses a cutoff computed once before the statement
//! runs. An upsert always writes `last_seen_at = now`, which is at or after
//! any cutoff a concurrent sweep could hold, so a freshly refreshed row is
//! never swept.

use crate::RegistryError;
use chrono::{DateTime, Utc};
use internims_types::{format_timestamp, liveness_window};
use rusqlite::{params, Connection, OptionalExtension, Row};

const PEER_COLUMNS: &str = "site_id, display_name, api_uri, public_key, user_list, last_seen_at";

/// The current liveness snapshot of one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub site_id: String,
    pub display_name: String,
    pub api_uri: String,
    /// Inherited from the authorized host at announcement time.
    pub public_key: String,
    /// `<username>#<homeSiteId>` entries, sorted and deduplicated.
    pub user_list: Vec<String>,
    pub last_seen_at: String,
}

impl PeerRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let user_list_json: String = row.get(4)?;
        let user_list = serde_json::from_str(&user_list_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            site_id: row.get(0)?,
            display_name: row.get(1)?,
            api_uri: row.get(2)?,
            public_key: row.get(3)?,
            user_list,
            last_seen_at: row.get(5)?,
        })
    }
}

/// The mutable fields written by an announcement.
#[derive(Debug, Clone, Copy)]
pub struct PeerUpdate<'a> {
    pub site_id: &'a str,
    pub display_name: &'a str,
    pub api_uri: &'a str,
    pub public_key: &'a str,
    pub user_list: &'a [String],
}

/// Creates or overwrites the snapshot for `update.site_id`, setting
/// `last_seen_at = now`.
///
/// # Errors
///
/// Returns [`RegistryError::Database`] if the write fails.
pub fn upsert_peer(
    conn: &Connection,
    update: &PeerUpdate<'_>,
    now: DateTime<Utc>,
) -> Result<PeerRecord, RegistryError> {
    let mut users = update.user_list.to_vec();
    users.sort();
    users.dedup();
    // Serializing a list of strings cannot fail.
    let user_list_json = serde_json::to_string(&users).unwrap_or_else(|_| "[]".to_string());

    let record = conn.query_row(
        &format!(
            "INSERT INTO peers ({PEER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(site_id) DO UPDATE SET
                display_name = excluded.display_name,
                api_uri = excluded.api_uri,
                public_key = excluded.public_key,
                user_list = excluded.user_list,
                last_seen_at = excluded.last_seen_at
             RETURNING {PEER_COLUMNS}"
        ),
        params![
            update.site_id,
            update.display_name,
            update.api_uri,
            update.public_key,
            user_list_json,
            format_timestamp(now),
        ],
        PeerRecord::from_row,
    )?;

    tracing::debug!(
        site_id = %record.site_id,
        api_uri = %record.api_uri,
        users = record.user_list.len(),
        "peer refreshed"
    );
    Ok(record)
}

/// Deletes every peer not seen within the liveness window and returns the
/// removed site ids, sorted.
///
/// # Errors
///
/// Returns [`RegistryError::Database`] if the delete fails.
pub fn sweep_expired_peers(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<String>, RegistryError> {
    let cutoff = format_timestamp(now - liveness_window());
    let mut stmt =
        conn.prepare("DELETE FROM peers WHERE last_seen_at < ?1 RETURNING site_id")?;
    let mut removed = stmt
        .query_map([cutoff], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    removed.sort();

    for site_id in &removed {
        tracing::info!(site_id, "peer expired");
    }
    Ok(removed)
}

/// Lists peers seen within the liveness window, ordered by site id.
///
/// # Errors
///
/// Returns [`RegistryError::Database`] if the query fails.
pub fn list_live_peers(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<PeerRecord>, RegistryError> {
    let cutoff = format_timestamp(now - liveness_window());
    let mut stmt = conn.prepare(&format!(
        "SELECT {PEER_COLUMNS} FROM peers WHERE last_seen_at >= ?1 ORDER BY site_id"
    ))?;
    let peers = stmt
        .query_map([cutoff], PeerRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(peers)
}

/// Returns the snapshot for `site_id` if it is live.
///
/// # Errors
///
/// Returns [`RegistryError::Database`] if the query fails.
pub fn get_live_peer(
    conn: &Connection,
    site_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<PeerRecord>, RegistryError> {
    let cutoff = format_timestamp(now - liveness_window());
    let peer = conn
        .query_row(
            &format!(
                "SELECT {PEER_COLUMNS} FROM peers WHERE site_id = ?1 AND last_seen_at >= ?2"
            ),
            params![site_id, cutoff],
            PeerRecord::from_row,
        )
        .optional()?;
    Ok(peer)
}
