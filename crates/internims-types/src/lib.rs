//! Shared types, constants, and time helpers for the InterNIMS peer registry.
//!
//! Every other crate in the workspace depends on this one for the protocol
//! clocks (liveness window, history threshold, challenge freshness), the
//! `<username>#<homeSiteId>` user scoping, and the canonical timestamp
//! format used both in storage and on the wire.
//!
//! Timestamps are stored as fixed-width UTC strings so that SQL string
//! comparison orders them correctly.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Seconds a peer record stays live after its last announcement.
pub const LIVENESS_WINDOW_SECS: i64 = 120;

/// Seconds a CRAM challenge stays fresh after issuance.
pub const CHALLENGE_TTL_SECS: i64 = 30;

/// Default number of days of silence before a history record is expired.
pub const DEFAULT_HISTORY_THRESHOLD_DAYS: i64 = 1;

/// Fixed-width UTC timestamp format, e.g. `2014-05-01T12:00:00.000000Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// The liveness window as a duration.
pub fn liveness_window() -> Duration {
    Duration::seconds(LIVENESS_WINDOW_SECS)
}

/// The challenge freshness window as a duration.
pub fn challenge_ttl() -> Duration {
    Duration::seconds(CHALLENGE_TTL_SECS)
}

/// Renders a timestamp in [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a timestamp previously rendered with [`format_timestamp`].
///
/// # Errors
///
/// Returns [`TypesError::InvalidTimestamp`] if the string does not match
/// [`TIMESTAMP_FORMAT`].
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TypesError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| TypesError::InvalidTimestamp(s.to_string()))
}

/// Errors produced when parsing shared types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    /// A user identifier was not of the form `<username>#<homeSiteId>`.
    #[error("user identifier '{0}' is not of the form <username>#<site>")]
    InvalidScopedUser(String),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// A user identifier scoped to the site the user belongs to.
///
/// Wire form is `<username>#<homeSiteId>`. The split happens at the last
/// `#`, so usernames may themselves contain `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedUser {
    /// The user's name at their home site.
    pub username: String,
    /// The site id the user belongs to.
    pub home_site: String,
}

impl ScopedUser {
    pub fn new(username: impl Into<String>, home_site: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            home_site: home_site.into(),
        }
    }
}

impl FromStr for ScopedUser {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('#') {
            Some((user, site)) if !user.is_empty() && !site.is_empty() => {
                Ok(Self::new(user, site))
            }
            _ => Err(TypesError::InvalidScopedUser(s.to_string())),
        }
    }
}

impl fmt::Display for ScopedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.username, self.home_site)
    }
}

/// Whether the requesting site appears in its own announcement response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfExclusion {
    /// The requester is left out of `sites`.
    #[default]
    Exclude,
    /// The requester is listed in `sites` alongside its peers.
    Include,
}

/// Authentication schemes a deployment may accept for announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// Detached signature over the request body.
    Signature,
    /// Challenge/response with an HMAC over a server nonce.
    Cram,
}

impl AuthScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Cram => "cram",
        }
    }
}
