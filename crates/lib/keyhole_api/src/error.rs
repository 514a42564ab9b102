//! Application error types.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use keyhole_core::GatewayError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Body sent without `Content-Type: application/json`.
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Same body as [`AppError::InvalidGrant`], answered with 401.
    #[error("Expired grant: {0}")]
    ExpiredGrant(String),

    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited, retry after {retry_after_secs} s")]
    RateLimited { retry_after_secs: i64 },

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "invalid_request", m.as_str()),
            AppError::UnsupportedMediaType(m) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "invalid_request", m.as_str())
            }
            AppError::InvalidGrant(m) => (StatusCode::BAD_REQUEST, "invalid_grant", m.as_str()),
            AppError::ExpiredGrant(m) => (StatusCode::UNAUTHORIZED, "invalid_grant", m.as_str()),
            AppError::InvalidRedirectUri(m) => {
                (StatusCode::BAD_REQUEST, "invalid_redirect_uri", m.as_str())
            }
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::InvalidApiKey => {
                (StatusCode::FORBIDDEN, "invalid_api_key", "Invalid API key")
            }
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "access_denied", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            ),
            AppError::Internal(detail) => {
                error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal Server Error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        let mut response = (status, body).into_response();
        if let AppError::RateLimited { retry_after_secs } = &self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(r) => {
                AppError::UnsupportedMediaType(r.body_text())
            }
            other => AppError::Validation(other.body_text()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidRequest(m) => AppError::Validation(m),
            GatewayError::InvalidGrant(m) => AppError::InvalidGrant(m),
            GatewayError::RedirectUriMismatch => AppError::InvalidGrant(
                "redirect_uri does not match the authorization request".into(),
            ),
            GatewayError::InvalidRedirectUri(_) => AppError::InvalidRedirectUri(
                "redirect_uri is not allowed for this project".into(),
            ),
            GatewayError::InvalidPkce(_) => {
                AppError::InvalidGrant("PKCE verification failed".into())
            }
            GatewayError::ExpiredCode => {
                AppError::ExpiredGrant("Invalid or expired authorization code".into())
            }
            GatewayError::RateLimited { retry_after_ms } => AppError::RateLimited {
                retry_after_secs: ((retry_after_ms + 999) / 1000).max(1),
            },
            GatewayError::UserNotFound => AppError::NotFound("User not found".into()),
            GatewayError::ProjectNotFound => AppError::NotFound("Project not found".into()),
            GatewayError::AccessDenied(denial) => {
                AppError::Forbidden(format!("Access denied: {denial}"))
            }
            GatewayError::InvalidApiKey => AppError::InvalidApiKey,
            GatewayError::SessionRejected(rejection) => {
                AppError::Unauthorized(rejection.reason().to_string())
            }
            GatewayError::Token(m) => AppError::Internal(m),
            GatewayError::Store(e) => AppError::Internal(e.to_string()),
        }
    }
}
