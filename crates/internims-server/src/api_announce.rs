//! `POST /`: the is-alive announcement.
//!
//! Order of checks, each a hard stop:
//! 1. Payload parses and names an `https` endpoint (400).
//! 2. Authentication: CRAM challenge (401) or refusal (403).
//! 3. Reachability probe unless `skip_reachable_check` (403).
//!
//! Only then are the peer snapshot and history touched, in one transaction.
//! A failed sweep afterwards is logged and does not fail the request.

use crate::api::ApiError;
use crate::config::SweepMode;
use crate::probe::check_api_uri;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::Extension,
    http::{header, HeaderMap},
    Json,
};
use chrono::Utc;
use internims_auth::{authenticate, AuthDecision, AuthMethod, AuthorizedHost, DenyReason};
use internims_registry::{
    compose_response, list_live_peers, run_sweeps, touch_history, upsert_peer,
    AnnouncementResponse, PeerUpdate,
};
use internims_types::ScopedUser;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

/// A user entry as sent by a site: `"user#site"` or `{"user", "site"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserEntry {
    Scoped(String),
    Pair { user: String, site: String },
}

impl UserEntry {
    fn into_scoped(self) -> Result<ScopedUser, ApiError> {
        match self {
            UserEntry::Scoped(raw) => raw
                .parse()
                .map_err(|e: internims_types::TypesError| ApiError::BadRequest(e.to_string())),
            UserEntry::Pair { user, site } => {
                if user.is_empty() || site.is_empty() {
                    return Err(ApiError::BadRequest(
                        "user entries need both user and site".to_string(),
                    ));
                }
                Ok(ScopedUser::new(user, site))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnnouncementPayload {
    #[serde(alias = "iid", alias = "_id")]
    site: String,
    api_uri: Option<String>,
    /// Older clients send a bare hostname instead of `api_uri`.
    hostname: Option<String>,
    users: Vec<UserEntry>,
    name: Option<String>,
}

/// A validated announcement.
#[derive(Debug)]
pub struct Announcement {
    pub site_id: String,
    pub api_uri: Url,
    pub users: Vec<ScopedUser>,
    pub name: Option<String>,
}

impl Announcement {
    /// Parses and validates a request body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::BadRequest`] for invalid JSON, a missing field, a
    /// badly scoped user, or an endpoint that is not `https`.
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        let payload: AnnouncementPayload = serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("malformed payload: {e}")))?;

        let site_id = payload.site.trim().to_string();
        if site_id.is_empty() {
            return Err(ApiError::BadRequest("site must not be empty".to_string()));
        }

        let raw_uri = match (payload.api_uri, payload.hostname) {
            (Some(uri), _) => uri,
            (None, Some(hostname)) => format!("https://{}", hostname.trim()),
            (None, None) => {
                return Err(ApiError::BadRequest(
                    "one of api_uri or hostname is required".to_string(),
                ))
            }
        };
        let api_uri = check_api_uri(&raw_uri)?;

        let users = payload
            .users
            .into_iter()
            .map(UserEntry::into_scoped)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            site_id,
            api_uri,
            users,
            name: payload.name.filter(|n| !n.trim().is_empty()),
        })
    }

    /// The host's admin-assigned name wins over the payload's, which wins
    /// over the bare site id.
    fn display_name(&self, host: &AuthorizedHost) -> String {
        host.common_name()
            .or(self.name.as_deref())
            .unwrap_or(&self.site_id)
            .to_string()
    }
}

/// Handler for `POST /`.
pub async fn announce_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AnnouncementResponse>, ApiError> {
    let announcement = Announcement::parse(&body).inspect_err(|e| {
        tracing::warn!(error = %e, "rejected malformed announcement");
    })?;

    let authorization = headers
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().map(str::to_string))
        .transpose()
        .map_err(|_| ApiError::BadRequest("authorization header is not ascii".to_string()))?;

    let auth_time = Utc::now();
    let site_id = announcement.site_id.clone();
    let auth_state = state.clone();
    let decision = tokio::task::spawn_blocking(move || -> Result<AuthDecision, ApiError> {
        let conn = auth_state.pool.get()?;
        let Some(method) = AuthMethod::classify(
            &auth_state.registry.auth_methods,
            authorization.as_deref(),
            &body,
        ) else {
            tracing::warn!(
                site_id = %site_id,
                reason = DenyReason::MissingCredentials.as_str(),
                "announcement denied"
            );
            return Ok(AuthDecision::Deny(DenyReason::MissingCredentials));
        };
        authenticate(&conn, &site_id, method, auth_time).map_err(ApiError::from)
    })
    .await??;

    let host = match decision {
        AuthDecision::Allow(host) => host,
        AuthDecision::Challenge(challenge) => {
            return Err(ApiError::ChallengeIssued(challenge.header_value()))
        }
        AuthDecision::Deny(reason) => return Err(ApiError::Forbidden(reason.as_str().to_string())),
    };

    if state.registry.skip_reachable_check {
        tracing::debug!(site_id = %announcement.site_id, "reachability check skipped");
    } else if let Err(e) = state.probe.probe(&announcement.api_uri).await {
        tracing::warn!(site_id = %announcement.site_id, error = %e, "announcement denied");
        return Err(e.into());
    }

    let display_name = announcement.display_name(&host);
    let response = tokio::task::spawn_blocking(move || -> Result<AnnouncementResponse, ApiError> {
        // Authentication and the probe can take seconds; stamp the write itself.
        let now = Utc::now();
        let mut conn = state.pool.get()?;
        let registry = &state.registry;
        let users: Vec<String> = announcement.users.iter().map(ToString::to_string).collect();

        let tx = conn.transaction().map_err(internims_registry::RegistryError::from)?;
        upsert_peer(
            &tx,
            &PeerUpdate {
                site_id: &host.site_id,
                display_name: &display_name,
                api_uri: announcement.api_uri.as_str(),
                public_key: &host.public_key,
                user_list: &users,
            },
            now,
        )?;
        touch_history(&tx, &host.site_id, now, registry.history_threshold_days)?;
        tx.commit().map_err(internims_registry::RegistryError::from)?;

        tracing::info!(
            site_id = %host.site_id,
            api_uri = %announcement.api_uri,
            users = users.len(),
            "updated peer"
        );

        if registry.sweep_mode == SweepMode::OnAnnounce {
            match run_sweeps(&conn, now, registry.history_threshold_days) {
                Ok(report) if !report.is_empty() => tracing::info!(
                    removed_peers = report.removed_peers.len(),
                    expired_history = report.expired_history.len(),
                    "sweep after announcement"
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "sweep after announcement failed"),
            }
        }

        let peers = list_live_peers(&conn, now)?;
        Ok(compose_response(
            &peers,
            &host.site_id,
            registry.self_exclusion,
        ))
    })
    .await??;

    Ok(Json(response))
}
