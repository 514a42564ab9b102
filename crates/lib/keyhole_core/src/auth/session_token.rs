//! Session token signing and verification.
//!
//! Tokens are HS256 JWTs carrying the user, the project and the user's
//! `token_version` at issue time. Verification always re-reads the stored
//! version, so bumping it kills every outstanding token on the next check.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::SessionRejection;
use crate::error::{GatewayError, Result};
use crate::models::User;
use crate::store::Store;

/// Claims embedded in session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: user ID.
    pub sub: Uuid,
    /// Project the session belongs to.
    pub pid: Uuid,
    /// User's `token_version` when the token was issued.
    pub ver: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Unique token ID.
    pub jti: Uuid,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A token whose signature, expiry and version all checked out.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub claims: SessionClaims,
    pub user: User,
}

/// Signs and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct SessionTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionTokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `(user_id, project_id)` at `token_version`.
    pub fn issue(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        token_version: i64,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = SessionClaims {
            sub: user_id,
            pid: project_id,
            ver: token_version,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| GatewayError::Token(format!("jwt encode: {e}")))?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Check signature and expiry only.
    pub fn decode(&self, token: &str) -> std::result::Result<SessionClaims, SessionRejection> {
        decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionRejection::TokenExpired,
                _ => {
                    debug!(error = %e, "session token rejected");
                    SessionRejection::InvalidToken
                }
            })
    }

    /// Full verification: signature, expiry, user existence and the
    /// kill-switch version compared against the stored value.
    pub async fn verify(&self, store: &dyn Store, token: &str) -> Result<VerifiedToken> {
        let claims = self.decode(token).map_err(GatewayError::SessionRejected)?;
        let user = store
            .find_user(claims.sub)
            .await?
            .ok_or(GatewayError::SessionRejected(SessionRejection::UserNotFound))?;
        if user.token_version != claims.ver {
            debug!(
                user_id = %user.id,
                token_version = claims.ver,
                current_version = user.token_version,
                "session token revoked by version bump"
            );
            return Err(GatewayError::SessionRejected(
                SessionRejection::TokenVersionMismatch,
            ));
        }
        Ok(VerifiedToken { claims, user })
    }
}

/// Resolve the signing secret: env `SESSION_SECRET` → `JWT_SECRET` → persisted file.
pub fn resolve_session_secret() -> String {
    for var in ["SESSION_SECRET", "JWT_SECRET"] {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    // Generate and persist
    let secret_path = session_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new session secret");
    secret
}

/// Path to the persisted session secret file.
fn session_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keyhole")
        .join("session-secret")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> SessionTokenService {
        SessionTokenService::new(b"test-secret", Duration::hours(1))
    }

    #[test]
    fn issue_then_decode() {
        let svc = service();
        let (user, project) = (Uuid::new_v4(), Uuid::new_v4());
        let token = svc.issue(user, project, 3).unwrap().token;
        let claims = svc.decode(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.pid, project);
        assert_eq!(claims.ver, 3);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn tampered_token_is_invalid() {
        let svc = service();
        let token = svc.issue(Uuid::new_v4(), Uuid::new_v4(), 0).unwrap().token;
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_sig = "AAAA".repeat(10);
        parts[2] = &forged_sig;
        assert_eq!(
            svc.decode(&parts.join(".")),
            Err(SessionRejection::InvalidToken)
        );
        assert_eq!(svc.decode("garbage"), Err(SessionRejection::InvalidToken));
    }

    #[test]
    fn other_secret_is_invalid() {
        let token = service().issue(Uuid::new_v4(), Uuid::new_v4(), 0).unwrap().token;
        let other = SessionTokenService::new(b"another-secret", Duration::hours(1));
        assert_eq!(other.decode(&token), Err(SessionRejection::InvalidToken));
    }

    #[test]
    fn expired_token_has_its_own_reason() {
        let svc = SessionTokenService::new(b"test-secret", Duration::seconds(-10));
        let token = svc.issue(Uuid::new_v4(), Uuid::new_v4(), 0).unwrap().token;
        assert_eq!(svc.decode(&token), Err(SessionRejection::TokenExpired));
    }

    #[tokio::test]
    async fn version_bump_revokes_token() {
        let store = MemoryStore::new();
        let user = store.add_user("kim@example.com");
        let svc = service();
        let token = svc.issue(user.id, Uuid::new_v4(), user.token_version).unwrap().token;

        let verified = svc.verify(&store, &token).await.unwrap();
        assert_eq!(verified.user.id, user.id);

        store.increment_token_version(user.id).await.unwrap();
        match svc.verify(&store, &token).await {
            Err(GatewayError::SessionRejected(SessionRejection::TokenVersionMismatch)) => {}
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleted_user_is_rejected() {
        let store = MemoryStore::new();
        let user = store.add_user("gone@example.com");
        let svc = service();
        let token = svc.issue(user.id, Uuid::new_v4(), 0).unwrap().token;
        store.remove_user(user.id);
        assert!(matches!(
            svc.verify(&store, &token).await,
            Err(GatewayError::SessionRejected(SessionRejection::UserNotFound))
        ));
    }
}
