//! Announcement authentication.
//!
//! [`authenticate`] decides ALLOW / DENY / CHALLENGE for one announcement.
//! It reads authorized hosts and spends CRAM challenges but never touches
//! the peer registry or history; on ALLOW it hands back the stored
//! [`AuthorizedHost`] so callers inherit its key and name instead of trusting
//! the payload.

use crate::challenge::{
    issue_challenge, parse_cram_response, purge_expired_challenges, take_fresh_challenge,
    verify_cram_digest, Challenge,
};
use crate::hosts::{get_active_host, store_public_key, AuthorizedHost};
use crate::signature::{decode_signature_header, SitePublicKey};
use crate::AuthError;
use chrono::{DateTime, Utc};
use internims_types::AuthScheme;
use rusqlite::Connection;

/// How an announcement claims to be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod<'a> {
    /// `authorization` is a base64 signature over `message`.
    Signature {
        message: &'a [u8],
        authorization: &'a str,
    },
    /// Challenge/response. `None` (or an unstructured header) asks for a
    /// challenge.
    Cram { authorization: Option<&'a str> },
}

impl<'a> AuthMethod<'a> {
    /// Picks the method for a request given the schemes a deployment accepts.
    ///
    /// An explicit `Signature ` or `CRAM ` prefix wins. Otherwise, with both
    /// schemes enabled, a header that decodes to `<siteId> <hex>` is CRAM and
    /// anything else is a signature. Without a header, CRAM (if enabled)
    /// issues a challenge. Returns `None` when no accepted scheme applies.
    pub fn classify(
        accepted: &[AuthScheme],
        authorization: Option<&'a str>,
        message: &'a [u8],
    ) -> Option<Self> {
        let cram = accepted.contains(&AuthScheme::Cram);
        let signature = accepted.contains(&AuthScheme::Signature);

        let Some(header) = authorization.map(str::trim).filter(|h| !h.is_empty()) else {
            return cram.then_some(Self::Cram {
                authorization: None,
            });
        };

        let as_signature = Self::Signature {
            message,
            authorization: header,
        };
        let as_cram = Self::Cram {
            authorization: Some(header),
        };

        if header.starts_with("Signature ") {
            return signature.then_some(as_signature);
        }
        if header.starts_with("CRAM ") {
            return cram.then_some(as_cram);
        }

        match (signature, cram) {
            (true, true) if parse_cram_response(header).is_some() => Some(as_cram),
            (true, _) => Some(as_signature),
            (false, true) => Some(as_cram),
            (false, false) => None,
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        match self {
            Self::Signature { .. } => AuthScheme::Signature,
            Self::Cram { .. } => AuthScheme::Cram,
        }
    }
}

/// Why an announcement was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No `Authorization` header and no scheme that could ask for one.
    MissingCredentials,
    /// Unknown or inactive site.
    NotAuthorized,
    /// CRAM response names a different site than the payload.
    SiteMismatch,
    /// No challenge issued in the last 30 seconds (or it was already spent).
    NoFreshChallenge,
    /// CRAM digest does not match.
    BadResponse,
    /// Stored key could not be parsed.
    UnusableKey,
    /// Signature header is not base64 or has the wrong length.
    MalformedSignature,
    /// Signature does not verify.
    BadSignature,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing authorization",
            Self::NotAuthorized => "host is not authorized",
            Self::SiteMismatch => "authorization is for a different site",
            Self::NoFreshChallenge => "no fresh challenge",
            Self::BadResponse => "challenge response does not match",
            Self::UnusableKey => "stored public key is unusable",
            Self::MalformedSignature => "malformed signature",
            Self::BadSignature => "message/signature is not authentic",
        }
    }
}

/// Outcome of [`authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow(AuthorizedHost),
    Deny(DenyReason),
    /// The caller must retry with a response to this challenge.
    Challenge(Challenge),
}

/// Authenticates an announcement from `site_id`.
///
/// Storage failures are errors; every protocol failure is a
/// [`AuthDecision::Deny`].
///
/// # Errors
///
/// Returns [`AuthError::Database`] if storage fails.
pub fn authenticate(
    conn: &Connection,
    site_id: &str,
    method: AuthMethod<'_>,
    now: DateTime<Utc>,
) -> Result<AuthDecision, AuthError> {
    let decision = match method {
        AuthMethod::Signature {
            message,
            authorization,
        } => authenticate_signature(conn, site_id, message, authorization)?,
        AuthMethod::Cram { authorization } => {
            authenticate_cram(conn, site_id, authorization, now)?
        }
    };

    match &decision {
        AuthDecision::Allow(_) => {
            tracing::debug!(site_id, scheme = method.scheme().as_str(), "authenticated")
        }
        AuthDecision::Deny(reason) => tracing::warn!(
            site_id,
            scheme = method.scheme().as_str(),
            reason = reason.as_str(),
            "announcement denied"
        ),
        AuthDecision::Challenge(_) => tracing::info!(site_id, "issued challenge"),
    }

    Ok(decision)
}

fn authenticate_signature(
    conn: &Connection,
    site_id: &str,
    message: &[u8],
    authorization: &str,
) -> Result<AuthDecision, AuthError> {
    let Some(host) = get_active_host(conn, site_id)? else {
        return Ok(AuthDecision::Deny(DenyReason::NotAuthorized));
    };
    let (host, normalized) = host.with_normalized_key();

    let Ok(key) = SitePublicKey::from_pem(&host.public_key) else {
        return Ok(AuthDecision::Deny(DenyReason::UnusableKey));
    };
    let Ok(signature) = decode_signature_header(authorization) else {
        return Ok(AuthDecision::Deny(DenyReason::MalformedSignature));
    };

    match key.verify(message, &signature) {
        Ok(()) => {
            tracing::debug!(site_id, key = key.kind(), "message/signature is authentic");
        }
        Err(crate::SignatureError::Malformed) => {
            return Ok(AuthDecision::Deny(DenyReason::MalformedSignature))
        }
        Err(_) => return Ok(AuthDecision::Deny(DenyReason::BadSignature)),
    }

    persist_normalized_key(conn, &host, normalized)?;
    Ok(AuthDecision::Allow(host))
}

fn authenticate_cram(
    conn: &Connection,
    site_id: &str,
    authorization: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuthDecision, AuthError> {
    purge_expired_challenges(conn, now)?;

    let Some(host) = get_active_host(conn, site_id)? else {
        return Ok(AuthDecision::Deny(DenyReason::NotAuthorized));
    };

    let Some(response) = authorization.and_then(parse_cram_response) else {
        return Ok(AuthDecision::Challenge(issue_challenge(conn, site_id, now)?));
    };

    if response.site_id != site_id {
        return Ok(AuthDecision::Deny(DenyReason::SiteMismatch));
    }

    let (host, normalized) = host.with_normalized_key();

    let Some(challenge) = take_fresh_challenge(conn, site_id, now)? else {
        return Ok(AuthDecision::Deny(DenyReason::NoFreshChallenge));
    };

    if !verify_cram_digest(&host.public_key, &challenge.challenge, &response.digest) {
        return Ok(AuthDecision::Deny(DenyReason::BadResponse));
    }

    persist_normalized_key(conn, &host, normalized)?;
    Ok(AuthDecision::Allow(host))
}

fn persist_normalized_key(
    conn: &Connection,
    host: &AuthorizedHost,
    normalized: bool,
) -> Result<(), AuthError> {
    if normalized {
        tracing::info!(site_id = %host.site_id, "converting public key line endings from crlf to lf");
        store_public_key(conn, &host.site_id, &host.public_key)?;
    }
    Ok(())
}
