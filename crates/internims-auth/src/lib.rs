//! Authentication for InterNIMS announcements.
//!
//! Two interchangeable schemes prove that an announcement comes from a
//! previously authorized site:
//!
//! - **Signature**: the request body is signed with the site's private key;
//!   the registry verifies it against the PEM public key on file.
//! - **CRAM**: the registry issues a single-use nonce; the site answers with
//!   an HMAC of the nonce keyed by its registered key text.
//!
//! [`authenticate`] dispatches on [`AuthMethod`] and returns an
//! [`AuthDecision`]. It reads `authorized_hosts` and spends rows in
//! `cram_challenges`; it never writes peer state.

mod authenticator;
mod challenge;
mod hosts;
mod signature;

pub use authenticator::{authenticate, AuthDecision, AuthMethod, DenyReason};
pub use challenge::{
    cram_digest, cram_response, issue_challenge, parse_cram_response, purge_expired_challenges,
    take_fresh_challenge, verify_cram_digest, Challenge, CramHash, CramResponse,
};
pub use hosts::{
    get_active_host, get_host, list_hosts, normalize_line_endings, register_authorized_host,
    set_active, slugify_site_id, store_public_key, AuthorizedHost,
};
pub use signature::{decode_signature_header, verify_detached, SignatureError, SitePublicKey};

use thiserror::Error;

/// Errors from the authentication layer. Protocol refusals are not errors;
/// they are reported as [`AuthDecision::Deny`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid site id: {0:?}")]
    InvalidSiteId(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("authorized host not found: {0}")]
    HostNotFound(String),
}
