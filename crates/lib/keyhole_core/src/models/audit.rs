//! Audit log models.
//!
//! Metadata is a tagged union of the event shapes the gateway emits, with an
//! open string-keyed map as fallback for rows written by other tooling.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "token.exchange")]
    TokenExchange,
    #[serde(rename = "session.verify")]
    SessionVerify,
    #[serde(rename = "session.logout")]
    SessionLogout,
    #[serde(rename = "session.revoke")]
    SessionRevoke,
    #[serde(rename = "user.revoke_tokens")]
    UserTokensRevoked,
    #[serde(rename = "setup_code.issue")]
    SetupCodeIssue,
    #[serde(rename = "setup_code.exchange")]
    SetupCodeExchange,
    #[serde(rename = "api_key.rotate")]
    ApiKeyRotate,
    #[serde(rename = "rate_limit.exceeded")]
    RateLimitExceeded,
}

impl AuditAction {
    pub const ALL: [AuditAction; 9] = [
        AuditAction::TokenExchange,
        AuditAction::SessionVerify,
        AuditAction::SessionLogout,
        AuditAction::SessionRevoke,
        AuditAction::UserTokensRevoked,
        AuditAction::SetupCodeIssue,
        AuditAction::SetupCodeExchange,
        AuditAction::ApiKeyRotate,
        AuditAction::RateLimitExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::TokenExchange => "token.exchange",
            AuditAction::SessionVerify => "session.verify",
            AuditAction::SessionLogout => "session.logout",
            AuditAction::SessionRevoke => "session.revoke",
            AuditAction::UserTokensRevoked => "user.revoke_tokens",
            AuditAction::SetupCodeIssue => "setup_code.issue",
            AuditAction::SetupCodeExchange => "setup_code.exchange",
            AuditAction::ApiKeyRotate => "api_key.rotate",
            AuditAction::RateLimitExceeded => "rate_limit.exceeded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == value)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(AuditStatus::Success),
            "failure" => Some(AuditStatus::Failure),
            _ => None,
        }
    }
}

/// Known audit event shapes, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditDetails {
    TokenExchange {
        redirect_uri: Option<String>,
        project_name: Option<String>,
        user_email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SessionVerify {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default)]
        new_session: bool,
    },
    SessionEnded {
        initiator: String,
    },
    TokensRevoked {
        token_version: i64,
        sessions_removed: u64,
    },
    SetupCode {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ApiKeyRotated,
    RateLimited {
        key: String,
        retry_after_ms: i64,
    },
}

/// Audit metadata: a known shape, or an arbitrary JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditMetadata {
    Known(AuditDetails),
    Other(serde_json::Map<String, serde_json::Value>),
}

impl AuditMetadata {
    /// Email of the user the event concerns, when the shape carries one.
    pub fn user_email(&self) -> Option<&str> {
        match self {
            AuditMetadata::Known(AuditDetails::TokenExchange { user_email, .. }) => {
                user_email.as_deref()
            }
            AuditMetadata::Other(map) => map.get("user_email").and_then(|v| v.as_str()),
            AuditMetadata::Known(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Parse stored JSON back into metadata. Non-object values become an empty map.
    pub fn from_json(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|_| AuditMetadata::Other(Default::default()))
    }
}

impl From<AuditDetails> for AuditMetadata {
    fn from(details: AuditDetails) -> Self {
        AuditMetadata::Known(details)
    }
}

/// An audit record waiting to be written.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub status: AuditStatus,
    pub user_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: AuditMetadata,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEntry {
    pub fn new(
        action: AuditAction,
        status: AuditStatus,
        metadata: impl Into<AuditMetadata>,
    ) -> Self {
        Self {
            action,
            status,
            user_id: None,
            project_id: None,
            ip_address: None,
            user_agent: None,
            metadata: metadata.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn project(mut self, project_id: Option<Uuid>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn client(mut self, client: &super::ClientInfo) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }

    /// Copy of this entry with both foreign-key references cleared.
    pub fn detached(&self) -> Self {
        Self {
            user_id: None,
            project_id: None,
            ..self.clone()
        }
    }
}

/// A persisted audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub status: AuditStatus,
    pub user_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: AuditMetadata,
    pub created_at: DateTime<Utc>,
}

/// Filter for audit listings. `limit` is clamped by the caller.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub project_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub status: Option<AuditStatus>,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn known_metadata_is_tagged_by_kind() {
        let meta = AuditMetadata::from(AuditDetails::RateLimited {
            key: "token:1.2.3.4".into(),
            retry_after_ms: 1500,
        });
        let value = meta.to_json();
        assert_eq!(value["kind"], "rate_limited");
        assert_eq!(value["retry_after_ms"], 1500);
        assert_eq!(AuditMetadata::from_json(value), meta);
    }

    #[test]
    fn unknown_kind_falls_back_to_map() {
        let raw = json!({"kind": "dashboard_login", "user_email": "a@b.c"});
        let meta = AuditMetadata::from_json(raw);
        match &meta {
            AuditMetadata::Other(map) => assert_eq!(map["kind"], "dashboard_login"),
            other => panic!("expected open map, got {other:?}"),
        }
        assert_eq!(meta.user_email(), Some("a@b.c"));
    }

    #[test]
    fn non_object_metadata_becomes_empty_map() {
        assert_eq!(
            AuditMetadata::from_json(json!("legacy string")),
            AuditMetadata::Other(Default::default())
        );
    }

    #[test]
    fn action_names_round_trip() {
        for action in AuditAction::ALL {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("nope"), None);
    }

    #[test]
    fn detached_clears_references_only() {
        let entry = NewAuditEntry::new(
            AuditAction::TokenExchange,
            AuditStatus::Success,
            AuditDetails::ApiKeyRotated,
        )
        .user(Some(Uuid::new_v4()))
        .project(Some(Uuid::new_v4()));
        let detached = entry.detached();
        assert!(detached.user_id.is_none());
        assert!(detached.project_id.is_none());
        assert_eq!(detached.action, entry.action);
        assert_eq!(detached.metadata, entry.metadata);
    }
}
