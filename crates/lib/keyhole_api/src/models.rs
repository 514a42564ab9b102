//! Request and response bodies (camelCase JSON).
//!
//! Request bodies also accept the snake_case OAuth2 parameter names.

use chrono::{DateTime, Utc};
use keyhole_core::audit::brute_force::BruteForceAssessment;
use keyhole_core::gateway::{ExchangeOutcome, ExchangeRequest, SessionSummary, SetupBootstrap};
use keyhole_core::models::{AuditLogEntry, Project, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

// -- token exchange ----------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub code: Option<String>,
    #[serde(alias = "redirectUri")]
    pub redirect_uri: Option<String>,
    #[serde(alias = "codeVerifier")]
    pub code_verifier: Option<String>,
}

impl From<TokenRequest> for ExchangeRequest {
    fn from(body: TokenRequest) -> Self {
        ExchangeRequest {
            code: body.code,
            redirect_uri: body.redirect_uri,
            code_verifier: body.code_verifier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

impl From<&Project> for ProjectInfo {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id,
            name: project.name.clone(),
            slug: project.slug.clone(),
        }
    }
}

/// Public exchange response. Never carries the token version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub user: UserInfo,
    pub project: ProjectInfo,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&ExchangeOutcome> for TokenResponse {
    fn from(outcome: &ExchangeOutcome) -> Self {
        Self {
            user: UserInfo::from(&outcome.user),
            project: ProjectInfo::from(&outcome.project),
            session_token: outcome.session_token.clone(),
            expires_at: outcome.expires_at,
        }
    }
}

/// Server-to-server exchange response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTokenResponse {
    #[serde(flatten)]
    pub token: TokenResponse,
    pub token_version: i64,
}

// -- sessions ----------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyRequest {
    pub token: Option<String>,
    #[serde(default, alias = "projectId")]
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectInfo>,
}

impl VerifyResponse {
    pub fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
            user: None,
            project: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub logged_out: bool,
}

// -- setup codes -------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupCodeResponse {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupCodeExchangeRequest {
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfigResponse {
    pub project_id: Uuid,
    pub name: String,
    pub slug: String,
    pub domain: Option<String>,
    pub is_public: bool,
}

impl From<SetupBootstrap> for SetupConfigResponse {
    fn from(b: SetupBootstrap) -> Self {
        Self {
            project_id: b.project_id,
            name: b.name,
            slug: b.slug,
            domain: b.domain,
            is_public: b.is_public,
        }
    }
}

// -- admin -------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: Uuid,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub idle: bool,
}

impl From<SessionSummary> for SessionInfo {
    fn from(summary: SessionSummary) -> Self {
        let s = summary.session;
        Self {
            user_id: s.user_id,
            last_seen_at: s.last_seen_at,
            created_at: s.created_at,
            ip_address: s.ip_address,
            user_agent: s.user_agent,
            idle: summary.idle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntryInfo {
    pub id: Uuid,
    pub action: String,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLogEntry> for AuditEntryInfo {
    fn from(e: AuditLogEntry) -> Self {
        Self {
            id: e.id,
            metadata: e.metadata.to_json(),
            action: e.action,
            status: e.status.as_str().to_string(),
            user_id: e.user_id,
            project_id: e.project_id,
            ip_address: e.ip_address,
            user_agent: e.user_agent,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditListResponse {
    pub entries: Vec<AuditEntryInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BruteForceQuery {
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BruteForceResponse {
    pub identifier: String,
    pub failed_attempts: usize,
    pub flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<i64>,
}

impl From<BruteForceAssessment> for BruteForceResponse {
    fn from(a: BruteForceAssessment) -> Self {
        Self {
            identifier: a.identifier,
            failed_attempts: a.failed_attempts,
            flagged: a.flagged,
            retry_after_ms: a.retry_after_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateKeyResponse {
    pub api_key: String,
}

// -- health ------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store_reachable: bool,
}
