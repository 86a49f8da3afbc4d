//! Authorized host store.
//!
//! Manages the `authorized_hosts` table: the sites allowed to announce
//! themselves, their display label, and the PEM public key used to check
//! their announcements. Rows are created by the administrative registration
//! flow and only ever toggled, never deleted.

use crate::signature::SitePublicKey;
use crate::AuthError;
use chrono::{DateTime, Utc};
use internims_types::format_timestamp;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::borrow::Cow;

/// Upper bound on `_N` suffixes tried while looking for a free site id.
const MAX_SUFFIX_ATTEMPTS: u32 = 1_000;

/// An identity record for a site permitted to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedHost {
    pub site_id: String,
    pub common_name: String,
    pub public_key: String,
    pub active: bool,
    pub created_at: String,
}

impl AuthorizedHost {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            site_id: row.get(0)?,
            common_name: row.get(1)?,
            public_key: row.get(2)?,
            active: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    /// The admin-assigned label, if one was set.
    pub fn common_name(&self) -> Option<&str> {
        Some(self.common_name.as_str()).filter(|name| !name.trim().is_empty())
    }

    /// Returns a copy with `\r\n` line endings in the key rewritten to `\n`,
    /// and whether anything changed.
    pub fn with_normalized_key(mut self) -> (Self, bool) {
        if !self.public_key.contains("\r\n") {
            return (self, false);
        }
        self.public_key = normalize_line_endings(&self.public_key).into_owned();
        (self, true)
    }
}

/// Rewrites `\r\n` sequences to `\n`. Keys pasted through browser forms
/// arrive with CRLF endings, which would change the HMAC key bytes.
pub fn normalize_line_endings(pem: &str) -> Cow<'_, str> {
    if pem.contains("\r\n") {
        Cow::Owned(pem.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(pem)
    }
}

/// Turns a human-chosen preliminary id into a site id.
///
/// Runs of characters outside `[A-Za-z0-9]` collapse to a single `_`, leading
/// and trailing underscores are trimmed, and the result is lowercased.
pub fn slugify_site_id(pre_site_id: &str) -> String {
    let mut slug = String::with_capacity(pre_site_id.len());
    let mut pending_sep = false;
    for ch in pre_site_id.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Registers a new authorized host and returns it.
///
/// The site id is derived from `pre_site_id` with [`slugify_site_id`]; if it
/// is taken, `_1`, `_2`, ... are appended until an insert succeeds. Each
/// attempt is a plain insert against the primary key, so two concurrent
/// registrations can never be handed the same id.
///
/// # Errors
///
/// - [`AuthError::InvalidSiteId`] if the preliminary id has no usable characters.
/// - [`AuthError::InvalidPublicKey`] if the key is not a supported PEM key.
/// - [`AuthError::Database`] on other storage failures.
pub fn register_authorized_host(
    conn: &Connection,
    pre_site_id: &str,
    public_key: &str,
    common_name: &str,
    now: DateTime<Utc>,
) -> Result<AuthorizedHost, AuthError> {
    let base = slugify_site_id(pre_site_id);
    if base.is_empty() {
        return Err(AuthError::InvalidSiteId(pre_site_id.to_string()));
    }

    let public_key = public_key.replace('\r', "");
    SitePublicKey::from_pem(&public_key)
        .map_err(|e| AuthError::InvalidPublicKey(e.to_string()))?;

    let created_at = format_timestamp(now);
    let common_name = common_name.trim();

    for attempt in 0..=MAX_SUFFIX_ATTEMPTS {
        let candidate = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}_{attempt}")
        };

        let res = conn.execute(
            "INSERT INTO authorized_hosts (site_id, common_name, public_key, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![candidate, common_name, public_key, created_at],
        );

        match res {
            Ok(_) => {
                tracing::info!(site_id = %candidate, "registered authorized host");
                return Ok(AuthorizedHost {
                    site_id: candidate,
                    common_name: common_name.to_string(),
                    public_key,
                    active: true,
                    created_at,
                });
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                tracing::debug!(site_id = %candidate, "site id taken, trying next suffix");
            }
            Err(e) => return Err(AuthError::Database(e)),
        }
    }

    Err(AuthError::InvalidSiteId(pre_site_id.to_string()))
}

/// Looks up a host by site id regardless of its `active` flag.
///
/// # Errors
///
/// Returns [`AuthError::Database`] if the query fails.
pub fn get_host(conn: &Connection, site_id: &str) -> Result<Option<AuthorizedHost>, AuthError> {
    conn.query_row(
        "SELECT site_id, common_name, public_key, active, created_at
         FROM authorized_hosts WHERE site_id = ?1",
        [site_id],
        AuthorizedHost::from_row,
    )
    .optional()
    .map_err(AuthError::Database)
}

/// Looks up a host that is allowed to authenticate (`active = 1`).
///
/// # Errors
///
/// Returns [`AuthError::Database`] if the query fails.
pub fn get_active_host(
    conn: &Connection,
    site_id: &str,
) -> Result<Option<AuthorizedHost>, AuthError> {
    conn.query_row(
        "SELECT site_id, common_name, public_key, active, created_at
         FROM authorized_hosts WHERE site_id = ?1 AND active = 1",
        [site_id],
        AuthorizedHost::from_row,
    )
    .optional()
    .map_err(AuthError::Database)
}

/// Lists every authorized host, ordered by site id.
///
/// # Errors
///
/// Returns [`AuthError::Database`] if the query fails.
pub fn list_hosts(conn: &Connection) -> Result<Vec<AuthorizedHost>, AuthError> {
    let mut stmt = conn.prepare(
        "SELECT site_id, common_name, public_key, active, created_at
         FROM authorized_hosts ORDER BY site_id",
    )?;
    let hosts = stmt
        .query_map([], AuthorizedHost::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hosts)
}

/// Enables or disables a host.
///
/// # Errors
///
/// Returns [`AuthError::HostNotFound`] if no host has this site id.
pub fn set_active(conn: &Connection, site_id: &str, active: bool) -> Result<(), AuthError> {
    let changed = conn.execute(
        "UPDATE authorized_hosts SET active = ?1 WHERE site_id = ?2",
        params![active, site_id],
    )?;
    if changed == 0 {
        return Err(AuthError::HostNotFound(site_id.to_string()));
    }
    tracing::info!(site_id, active, "authorized host toggled");
    Ok(())
}

/// Persists a replacement public key for a host.
///
/// # Errors
///
/// Returns [`AuthError::HostNotFound`] if no host has this site id.
pub fn store_public_key(
    conn: &Connection,
    site_id: &str,
    public_key: &str,
) -> Result<(), AuthError> {
    let changed = conn.execute(
        "UPDATE authorized_hosts SET public_key = ?1 WHERE site_id = ?2",
        params![public_key, site_id],
    )?;
    if changed == 0 {
        return Err(AuthError::HostNotFound(site_id.to_string()));
    }
    Ok(())
}
