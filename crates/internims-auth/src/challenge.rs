//! CRAM challenge issuance and consumption.
//!
//! A site announcing without credentials is handed a 128-bit nonce. It proves
//! possession of its registered key material by returning
//! `base64("<siteId> " + hex(HMAC(key = publicKeyPem, msg = nonce)))`.
//! Existing clients use HMAC-MD5; HMAC-SHA256 is also accepted. The two are
//! told apart by digest length.
//!
//! Storage keeps at most one challenge per site (primary key on `site_id`).
//! Issuance is a single conditional upsert that keeps a fresh challenge and
//! replaces a stale one, so concurrent unauthenticated announcements from the
//! same site all receive the same nonce. Consumption is a single
//! `DELETE ... RETURNING`, so a challenge can be spent at most once.

use crate::AuthError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use internims_types::{challenge_ttl, format_timestamp};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use md5::Md5;
use sha2::Sha256;

type HmacMd5 = Hmac<Md5>;
type HmacSha256 = Hmac<Sha256>;

/// Digest used for a CRAM response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CramHash {
    /// HMAC-MD5, as computed by existing clients.
    Md5,
    /// HMAC-SHA256.
    Sha256,
}

impl CramHash {
    /// Identifies the hash from the length of a raw digest.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::Md5),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// An outstanding nonce for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub site_id: String,
    pub challenge: String,
    pub issued_at: String,
}

impl Challenge {
    /// The value sent to the client in the `WWW-Authenticate` header.
    pub fn header_value(&self) -> String {
        STANDARD.encode(self.challenge.as_bytes())
    }
}

fn generate_challenge_value() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns the fresh challenge for `site_id`, issuing a new one if none is
/// fresh.
///
/// # Errors
///
/// Returns [`AuthError::Database`] if the upsert or read fails.
pub fn issue_challenge(
    conn: &Connection,
    site_id: &str,
    now: DateTime<Utc>,
) -> Result<Challenge, AuthError> {
    let cutoff = format_timestamp(now - challenge_ttl());
    conn.execute(
        "INSERT INTO cram_challenges (site_id, challenge, issued_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(site_id) DO UPDATE SET
            challenge = excluded.challenge,
            issued_at = excluded.issued_at
         WHERE cram_challenges.issued_at <= ?4",
        params![
            site_id,
            generate_challenge_value(),
            format_timestamp(now),
            cutoff
        ],
    )?;

    let challenge = conn.query_row(
        "SELECT site_id, challenge, issued_at FROM cram_challenges WHERE site_id = ?1",
        [site_id],
        |row| {
            Ok(Challenge {
                site_id: row.get(0)?,
                challenge: row.get(1)?,
                issued_at: row.get(2)?,
            })
        },
    )?;

    tracing::debug!(site_id, issued_at = %challenge.issued_at, "challenge in force");
    Ok(challenge)
}

/// Removes and returns the fresh challenge for `site_id`, if any.
///
/// A stale challenge is left in place for [`purge_expired_challenges`].
///
/// # Errors
///
/// Returns [`AuthError::Database`] if the delete fails.
pub fn take_fresh_challenge(
    conn: &Connection,
    site_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Challenge>, AuthError> {
    let cutoff = format_timestamp(now - challenge_ttl());
    conn.query_row(
        "DELETE FROM cram_challenges WHERE site_id = ?1 AND issued_at > ?2
         RETURNING site_id, challenge, issued_at",
        params![site_id, cutoff],
        |row| {
            Ok(Challenge {
                site_id: row.get(0)?,
                challenge: row.get(1)?,
                issued_at: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(AuthError::Database)
}

/// Deletes every challenge older than the freshness window, system-wide.
///
/// # Errors
///
/// Returns [`AuthError::Database`] if the delete fails.
pub fn purge_expired_challenges(conn: &Connection, now: DateTime<Utc>) -> Result<usize, AuthError> {
    let cutoff = format_timestamp(now - challenge_ttl());
    let purged = conn.execute(
        "DELETE FROM cram_challenges WHERE issued_at <= ?1",
        [cutoff],
    )?;
    if purged > 0 {
        tracing::debug!(count = purged, "purged stale challenges");
    }
    Ok(purged)
}

fn keyed_mac<M>(public_key_pem: &str, challenge: &str) -> Option<M>
where
    M: Mac + KeyInit,
{
    let mut mac = <M as KeyInit>::new_from_slice(public_key_pem.as_bytes()).ok()?;
    mac.update(challenge.as_bytes());
    Some(mac)
}

/// Computes the hex HMAC digest a site must return for `challenge`.
pub fn cram_digest(hash: CramHash, public_key_pem: &str, challenge: &str) -> Option<String> {
    let bytes = match hash {
        CramHash::Md5 => keyed_mac::<HmacMd5>(public_key_pem, challenge)?
            .finalize()
            .into_bytes()
            .to_vec(),
        CramHash::Sha256 => keyed_mac::<HmacSha256>(public_key_pem, challenge)?
            .finalize()
            .into_bytes()
            .to_vec(),
    };
    Some(hex::encode(bytes))
}

/// Builds the full `Authorization` header value a site sends in reply to a
/// challenge.
pub fn cram_response(
    hash: CramHash,
    site_id: &str,
    public_key_pem: &str,
    challenge: &str,
) -> Option<String> {
    let digest = cram_digest(hash, public_key_pem, challenge)?;
    Some(STANDARD.encode(format!("{site_id} {digest}")))
}

/// A decoded CRAM `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CramResponse {
    pub site_id: String,
    pub digest: Vec<u8>,
}

/// Parses `base64("<siteId> <hexDigest>")`, tolerating a leading `CRAM `
/// scheme token. Returns `None` if the value lacks that structure.
pub fn parse_cram_response(value: &str) -> Option<CramResponse> {
    let value = value.trim();
    let encoded = value.strip_prefix("CRAM ").unwrap_or(value).trim();
    let decoded = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let mut parts = text.split_whitespace();
    let site_id = parts.next()?;
    let digest_hex = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let digest = hex::decode(digest_hex).ok()?;
    Some(CramResponse {
        site_id: site_id.to_string(),
        digest,
    })
}

/// Checks a returned digest against the expected HMAC in constant time. The
/// hash is picked from the digest length; any other length fails.
pub fn verify_cram_digest(public_key_pem: &str, challenge: &str, digest: &[u8]) -> bool {
    match CramHash::from_digest_len(digest.len()) {
        Some(CramHash::Md5) => keyed_mac::<HmacMd5>(public_key_pem, challenge)
            .is_some_and(|mac| mac.verify_slice(digest).is_ok()),
        Some(CramHash::Sha256) => keyed_mac::<HmacSha256>(public_key_pem, challenge)
            .is_some_and(|mac| mac.verify_slice(digest).is_ok()),
        None => false,
    }
}
