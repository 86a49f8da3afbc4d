//! Shared API error type.

use crate::probe::ProbeError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed payload or a non-https endpoint. Nothing was written.
    #[error("invalid input: {0}")]
    BadRequest(String),

    /// The caller must answer a CRAM challenge. Carries the base64 value
    /// sent back in `WWW-Authenticate`.
    #[error("authentication required")]
    ChallengeIssued(String),

    /// Unknown or inactive site, failed authentication, or an unreachable
    /// endpoint. Nothing was written.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl From<ProbeError> for ApiError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::InvalidUri(_) | ProbeError::InsecureScheme(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ProbeError::Unreachable { .. } => ApiError::Forbidden(err.to_string()),
        }
    }
}

impl From<internims_auth::AuthError> for ApiError {
    fn from(err: internims_auth::AuthError) -> Self {
        tracing::error!(error = %err, "authentication storage failure");
        ApiError::InternalServerError("storage failure".to_string())
    }
}

impl From<internims_registry::RegistryError> for ApiError {
    fn from(err: internims_registry::RegistryError) -> Self {
        tracing::error!(error = %err, "registry storage failure");
        ApiError::InternalServerError("storage failure".to_string())
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(err: r2d2::Error) -> Self {
        tracing::error!(error = %err, "db connection failed");
        ApiError::InternalServerError("db connection failed".to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!(error = %err, "blocking task failed");
        ApiError::InternalServerError("task join error".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ChallengeIssued(challenge) => {
                let body = Json(serde_json::json!({
                    "error": "authentication required"
                }));
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, challenge)],
                    body,
                )
                    .into_response();
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
