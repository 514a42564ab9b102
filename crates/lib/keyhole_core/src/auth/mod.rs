//! Authentication building blocks.
//!
//! Stateless checks (PKCE, redirect policy, token signing) plus the
//! store-backed code, session and access-control operations that the
//! [`Gateway`](crate::gateway::Gateway) composes.

pub mod access;
pub mod api_keys;
pub mod codes;
pub mod pkce;
pub mod redirect;
pub mod session_token;
pub mod sessions;

use std::fmt;

use serde::Serialize;

/// Machine-readable reason a session token failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRejection {
    InvalidToken,
    TokenExpired,
    TokenVersionMismatch,
    UserNotFound,
    ProjectNotFound,
    UserNotMember,
    ProjectMismatch,
    IdleTimeout,
    SessionRevoked,
}

impl SessionRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            SessionRejection::InvalidToken => "invalid_token",
            SessionRejection::TokenExpired => "token_expired",
            SessionRejection::TokenVersionMismatch => "token_version_mismatch",
            SessionRejection::UserNotFound => "user_not_found",
            SessionRejection::ProjectNotFound => "project_not_found",
            SessionRejection::UserNotMember => "user_not_member",
            SessionRejection::ProjectMismatch => "project_mismatch",
            SessionRejection::IdleTimeout => "idle_timeout",
            SessionRejection::SessionRevoked => "session_revoked",
        }
    }
}

impl fmt::Display for SessionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}
