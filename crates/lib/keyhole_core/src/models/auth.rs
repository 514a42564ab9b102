//! Identity and code domain models.
//!
//! These are internal domain models, distinct from the HTTP request/response
//! models in `keyhole_api` (which carry `#[serde(rename)]` for camelCase etc.).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    /// Kill-switch counter. Every issued session token embeds the value current
    /// at issue time; bumping it revokes all of them.
    pub token_version: i64,
}

/// A client project (tenant) that redirects users here for login.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Public client identifier.
    pub slug: String,
    /// Allowed redirect host. `None` disables the host check.
    pub domain: Option<String>,
    pub is_public: bool,
}

/// Membership of a user in a private project.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectMembership {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub role: String,
}

/// PKCE challenge attached to an authorization code. Only `S256` is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: String,
}

/// Stored authorization code. `code_hash` is the SHA-256 of the plaintext code.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthorizationCode {
    pub code_hash: String,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn pkce(&self) -> Option<PkceChallenge> {
        self.code_challenge.as_ref().map(|challenge| PkceChallenge {
            challenge: challenge.clone(),
            method: self
                .code_challenge_method
                .clone()
                .unwrap_or_else(|| "S256".to_string()),
        })
    }
}

/// Insert payload for a new authorization code.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    pub code_hash: String,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub redirect_uri: String,
    pub pkce: Option<PkceChallenge>,
    pub expires_at: DateTime<Utc>,
}

/// One-time configuration bootstrap code for a project.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SetupCode {
    pub code_hash: String,
    pub project_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request metadata captured at the boundary (for sessions, audit and rate limiting).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
        }
    }

    /// Identity used in rate-limit keys.
    pub fn rate_limit_identity(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}
