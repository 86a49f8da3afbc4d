//! Outbound reachability check of a site's claimed API endpoint.
//!
//! Two layers:
//! - [`check_api_uri`] is a pure syntax check (well-formed, `https`, has a
//!   host). It never touches the network and runs on every announcement.
//! - [`ReachabilityProbe`] sends a HEAD request and classifies the outcome.
//!   Only `200` counts as reachable. Every request carries a hard timeout so
//!   a slow or silent endpoint degrades to a rejection.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Why an endpoint was not accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid api_uri: {0}")]
    InvalidUri(String),

    #[error("api_uri must use https: {0}")]
    InsecureScheme(String),

    #[error("{uri} is unreachable: {reason}")]
    Unreachable { uri: String, reason: String },
}

/// Parses `raw` and requires an `https` URL with a host.
///
/// # Errors
///
/// Returns [`ProbeError::InvalidUri`] if the value does not parse or has no
/// host, or [`ProbeError::InsecureScheme`] for any scheme but `https`.
pub fn check_api_uri(raw: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(raw.trim()).map_err(|e| ProbeError::InvalidUri(format!("{raw}: {e}")))?;
    if url.scheme() != "https" {
        return Err(ProbeError::InsecureScheme(raw.to_string()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProbeError::InvalidUri(format!("{raw}: missing host")));
    }
    Ok(url)
}

/// Checks that an endpoint answers.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns `Ok(())` if `api_uri` is reachable.
    async fn probe(&self, api_uri: &Url) -> Result<(), ProbeError>;
}

/// [`ReachabilityProbe`] backed by a `reqwest` HEAD request.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Builds a probe with the given per-request timeout and `User-Agent`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self, api_uri: &Url) -> Result<(), ProbeError> {
        let unreachable = |reason: String| ProbeError::Unreachable {
            uri: api_uri.to_string(),
            reason,
        };

        let response = self
            .client
            .head(api_uri.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    unreachable("connection timed out".into())
                } else if e.is_connect() {
                    unreachable("connection failed".into())
                } else {
                    unreachable(format!("request failed: {e}"))
                }
            })?;

        match response.status() {
            StatusCode::OK => {
                tracing::debug!(api_uri = %api_uri, "endpoint reachable");
                Ok(())
            }
            status => Err(unreachable(format!("HEAD returned {status}"))),
        }
    }
}
