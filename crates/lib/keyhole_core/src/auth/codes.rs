//! Authorization code lifecycle: issue, redeem, expire.
//!
//! Codes are opaque 32-byte random values. Only their SHA-256 digest is
//! stored, and redemption is a single conditional claim in the store.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{AuthorizationCode, NewAuthorizationCode, PkceChallenge};
use crate::store::{Store, StoreError};

/// Generate a fresh plaintext code (43 chars, base64url).
pub fn generate_code() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest of a plaintext code, as stored.
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A freshly issued code. `code` is the only copy of the plaintext.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn issue(
    store: &dyn Store,
    user_id: Uuid,
    project_id: Uuid,
    redirect_uri: &str,
    ttl: Duration,
    pkce: Option<PkceChallenge>,
) -> Result<IssuedCode, StoreError> {
    let code = generate_code();
    let expires_at = Utc::now() + ttl;
    store
        .insert_code(&NewAuthorizationCode {
            code_hash: hash_code(&code),
            user_id,
            project_id,
            redirect_uri: redirect_uri.to_string(),
            pkce,
            expires_at,
        })
        .await?;
    debug!(user_id = %user_id, project_id = %project_id, %expires_at, "issued authorization code");
    Ok(IssuedCode { code, expires_at })
}

/// Fields carried by a successfully redeemed code.
#[derive(Debug, Clone)]
pub struct RedeemedCode {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
}

impl From<AuthorizationCode> for RedeemedCode {
    fn from(code: AuthorizationCode) -> Self {
        Self {
            user_id: code.user_id,
            project_id: code.project_id,
            redirect_uri: code.redirect_uri,
            code_challenge: code.code_challenge,
        }
    }
}

#[derive(Debug, Error)]
pub enum RedeemError {
    #[error("authorization code not found")]
    NotFound,

    #[error("authorization code expired")]
    Expired,

    #[error("authorization code already used")]
    AlreadyUsed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Claim a code. At most one concurrent caller succeeds; losers are told
/// why, for logging. Clients should not see the difference.
pub async fn redeem(
    store: &dyn Store,
    code: &str,
    now: DateTime<Utc>,
) -> Result<RedeemedCode, RedeemError> {
    redeem_hash(store, &hash_code(code), now).await
}

pub(crate) async fn redeem_hash(
    store: &dyn Store,
    code_hash: &str,
    now: DateTime<Utc>,
) -> Result<RedeemedCode, RedeemError> {
    if let Some(claimed) = store.claim_code(code_hash, now).await? {
        return Ok(claimed.into());
    }
    let error = match store.find_code(code_hash).await? {
        None => RedeemError::NotFound,
        Some(code) if code.used_at.is_some() => RedeemError::AlreadyUsed,
        Some(_) => RedeemError::Expired,
    };
    info!(reason = %error, "authorization code redemption refused");
    Err(error)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::MemoryStore;

    const CALLBACK: &str = "https://app.example/cb";

    async fn seeded() -> (Arc<MemoryStore>, Uuid, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("eve@example.com");
        let project = store.add_project("app", Some("app.example"), true, "kh_app");
        (store, user.id, project.id)
    }

    #[test]
    fn generated_codes_are_opaque() {
        let a = generate_code();
        assert_eq!(a.len(), 43);
        assert_ne!(a, generate_code());
        assert_ne!(hash_code(&a), a);
    }

    #[tokio::test]
    async fn redeem_once() {
        let (store, user, project) = seeded().await;
        let issued = issue(store.as_ref(), user, project, CALLBACK, Duration::minutes(5), None)
            .await
            .unwrap();

        let redeemed = redeem(store.as_ref(), &issued.code, Utc::now()).await.unwrap();
        assert_eq!(redeemed.user_id, user);
        assert_eq!(redeemed.redirect_uri, "https://app.example/cb");

        assert!(matches!(
            redeem(store.as_ref(), &issued.code, Utc::now()).await,
            Err(RedeemError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn unknown_and_expired_are_distinguished() {
        let (store, user, project) = seeded().await;
        assert!(matches!(
            redeem(store.as_ref(), "nope", Utc::now()).await,
            Err(RedeemError::NotFound)
        ));

        let issued = issue(store.as_ref(), user, project, CALLBACK, Duration::minutes(1), None)
            .await
            .unwrap();
        let later = Utc::now() + Duration::minutes(2);
        assert!(matches!(
            redeem(store.as_ref(), &issued.code, later).await,
            Err(RedeemError::Expired)
        ));
    }

    #[tokio::test]
    async fn issue_requires_existing_user() {
        let (store, _, project) = seeded().await;
        let ttl = Duration::minutes(5);
        let result = issue(store.as_ref(), Uuid::new_v4(), project, CALLBACK, ttl, None).await;
        assert!(matches!(result, Err(StoreError::ForeignKeyViolation(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redeemers_have_one_winner() {
        let (store, user, project) = seeded().await;
        let issued = issue(store.as_ref(), user, project, CALLBACK, Duration::minutes(5), None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let code = issued.code.clone();
            handles.push(tokio::spawn(async move {
                redeem(store.as_ref(), &code, Utc::now()).await.is_ok()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
