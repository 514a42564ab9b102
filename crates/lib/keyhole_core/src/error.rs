//! Gateway error taxonomy.

use thiserror::Error;

use crate::auth::SessionRejection;
use crate::auth::access::AccessDenial;
use crate::auth::redirect::RedirectRejection;
use crate::store::StoreError;

/// Errors surfaced by gateway operations. `keyhole_api` maps each variant to
/// an HTTP status and a stable `error` string.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Redirect URI does not match the authorization code")]
    RedirectUriMismatch,

    #[error("Redirect URI rejected: {0}")]
    InvalidRedirectUri(RedirectRejection),

    #[error("PKCE verification failed: {0}")]
    InvalidPkce(String),

    #[error("Authorization code expired")]
    ExpiredCode,

    #[error("Rate limit exceeded, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: i64 },

    #[error("User not found")]
    UserNotFound,

    #[error("Project not found")]
    ProjectNotFound,

    #[error("Access denied: {0}")]
    AccessDenied(AccessDenial),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Session rejected: {0}")]
    SessionRejected(SessionRejection),

    #[error("Token error: {0}")]
    Token(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        GatewayError::Store(StoreError::Sql(e))
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
