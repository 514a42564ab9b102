//! Project API keys.
//!
//! Server-to-server secrets sent in the `x-api-key` header. Only the SHA-256
//! digest is stored; the plaintext is shown once at rotation.

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::models::Project;
use crate::store::Store;

pub const API_KEY_PREFIX: &str = "kh_";

/// Generate a random key: `kh_` followed by 48 alphanumeric chars.
pub fn generate_api_key() -> String {
    let body: String = rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect();
    format!("{API_KEY_PREFIX}{body}")
}

/// SHA-256 hash a key for storage.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolve a presented key to its project.
pub async fn resolve(store: &dyn Store, key: &str) -> Result<Project> {
    let key = key.trim();
    if key.is_empty() {
        return Err(GatewayError::InvalidApiKey);
    }
    store
        .find_project_by_api_key(&hash_api_key(key))
        .await?
        .ok_or(GatewayError::InvalidApiKey)
}

/// Replace the project's key. The previous key stops working immediately.
/// Returns the new plaintext key.
pub async fn rotate(store: &dyn Store, project_id: Uuid) -> Result<String> {
    let plaintext = generate_api_key();
    if !store
        .replace_api_key(project_id, &hash_api_key(&plaintext))
        .await?
    {
        return Err(GatewayError::ProjectNotFound);
    }
    info!(project_id = %project_id, "rotated project API key");
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn generated_keys_are_unique_and_prefixed() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with(API_KEY_PREFIX));
        assert_eq!(a.len(), API_KEY_PREFIX.len() + 48);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = hash_api_key("kh_test");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_api_key("kh_test"));
    }

    #[tokio::test]
    async fn rotation_invalidates_old_key_immediately() {
        let store = MemoryStore::new();
        let project = store.add_project("acme", Some("acme.dev"), false, "kh_old");

        assert_eq!(resolve(&store, "kh_old").await.unwrap().id, project.id);

        let new_key = rotate(&store, project.id).await.unwrap();
        assert!(matches!(
            resolve(&store, "kh_old").await,
            Err(GatewayError::InvalidApiKey)
        ));
        assert_eq!(resolve(&store, &new_key).await.unwrap().id, project.id);
    }

    #[tokio::test]
    async fn blank_and_unknown_keys_are_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(resolve(&store, "  ").await, Err(GatewayError::InvalidApiKey)));
        assert!(matches!(
            resolve(&store, "kh_nope").await,
            Err(GatewayError::InvalidApiKey)
        ));
        assert!(matches!(
            rotate(&store, Uuid::new_v4()).await,
            Err(GatewayError::ProjectNotFound)
        ));
    }
}
