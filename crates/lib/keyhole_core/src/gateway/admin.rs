//! Administrative paths: API keys, setup codes, session listings, the kill
//! switch, audit queries and maintenance.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{DEFAULT_AUDIT_PAGE, Gateway, MAX_AUDIT_PAGE};
use crate::audit::brute_force::{self, BruteForceAssessment};
use crate::auth::{api_keys, codes, sessions};
use crate::error::{GatewayError, Result};
use crate::models::{
    AuditAction, AuditDetails, AuditFilter, AuditLogEntry, AuditStatus, ClientInfo,
    NewAuditEntry, Project, ProjectSession,
};
use crate::rate_limit::LimitClass;

#[derive(Debug, Clone)]
pub struct IssuedSetupCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Public project configuration handed out for a redeemed setup code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupBootstrap {
    pub project_id: Uuid,
    pub name: String,
    pub slug: String,
    pub domain: Option<String>,
    pub is_public: bool,
}

impl From<Project> for SetupBootstrap {
    fn from(project: Project) -> Self {
        Self {
            project_id: project.id,
            name: project.name,
            slug: project.slug,
            domain: project.domain,
            is_public: project.is_public,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: ProjectSession,
    pub idle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokedTokens {
    pub token_version: i64,
    pub sessions_removed: u64,
}

impl Gateway {
    /// Resolve an `x-api-key` to its project, counting the call against the
    /// API rate limit.
    pub async fn authenticate_api_key(&self, key: &str, client: &ClientInfo) -> Result<Project> {
        self.enforce_rate_limit(LimitClass::Api, client).await?;
        api_keys::resolve(self.store(), key).await.inspect_err(|e| {
            if matches!(e, GatewayError::InvalidApiKey) {
                warn!(ip = client.rate_limit_identity(), "rejected API key");
            }
        })
    }

    /// Replace the project's API key and return the new plaintext.
    pub async fn rotate_api_key(&self, project_id: Uuid, client: &ClientInfo) -> Result<String> {
        let key = api_keys::rotate(self.store(), project_id).await?;
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::ApiKeyRotate,
                AuditStatus::Success,
                AuditDetails::ApiKeyRotated,
            )
            .project(Some(project_id))
            .client(client),
        );
        Ok(key)
    }

    pub async fn issue_setup_code(
        &self,
        project: &Project,
        client: &ClientInfo,
    ) -> Result<IssuedSetupCode> {
        let code = codes::generate_code();
        let expires_at = Utc::now() + self.settings.setup_code_ttl;
        self.store
            .insert_setup_code(&codes::hash_code(&code), project.id, expires_at)
            .await?;
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::SetupCodeIssue,
                AuditStatus::Success,
                AuditDetails::SetupCode { reason: None },
            )
            .project(Some(project.id))
            .client(client),
        );
        Ok(IssuedSetupCode { code, expires_at })
    }

    /// Redeem a setup code once for the project's public configuration.
    pub async fn exchange_setup_code(
        &self,
        code: &str,
        client: &ClientInfo,
    ) -> Result<SetupBootstrap> {
        self.enforce_rate_limit(LimitClass::Authentication, client)
            .await?;
        let code = code.trim();
        if code.is_empty() {
            return Err(GatewayError::InvalidRequest("code is required".into()));
        }
        let Some(claimed) = self
            .store
            .claim_setup_code(&codes::hash_code(code), Utc::now())
            .await?
        else {
            self.setup_code_failed(None, "invalid_setup_code", client);
            return Err(GatewayError::InvalidGrant(
                "Invalid or expired setup code".into(),
            ));
        };
        let Some(project) = self.store.find_project(claimed.project_id).await? else {
            self.setup_code_failed(None, "project_not_found", client);
            return Err(GatewayError::ProjectNotFound);
        };
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::SetupCodeExchange,
                AuditStatus::Success,
                AuditDetails::SetupCode { reason: None },
            )
            .project(Some(project.id))
            .client(client),
        );
        Ok(project.into())
    }

    fn setup_code_failed(&self, project_id: Option<Uuid>, reason: &str, client: &ClientInfo) {
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::SetupCodeExchange,
                AuditStatus::Failure,
                AuditDetails::SetupCode {
                    reason: Some(reason.to_string()),
                },
            )
            .project(project_id)
            .client(client),
        );
    }

    /// Sessions of one project, most recently seen first.
    pub async fn list_sessions(&self, project_id: Uuid) -> Result<Vec<SessionSummary>> {
        let now = Utc::now();
        Ok(self
            .store
            .list_sessions(project_id)
            .await?
            .into_iter()
            .map(|session| SessionSummary {
                idle: sessions::is_idle(&session, self.settings.idle_timeout, now),
                session,
            })
            .collect())
    }

    /// End one user's session in a project. Tokens issued before now stop
    /// verifying. Returns whether a live session was ended.
    pub async fn revoke_session(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        client: &ClientInfo,
    ) -> Result<bool> {
        let removed = self.store.end_session(user_id, project_id, Utc::now()).await?;
        if removed {
            self.audit.record(
                NewAuditEntry::new(
                    AuditAction::SessionRevoke,
                    AuditStatus::Success,
                    AuditDetails::SessionEnded {
                        initiator: "admin".into(),
                    },
                )
                .user(Some(user_id))
                .project(Some(project_id))
                .client(client),
            );
        }
        Ok(removed)
    }

    /// Kill switch: bump the user's token version and drop all sessions.
    pub async fn revoke_user_tokens(&self, user_id: Uuid) -> Result<RevokedTokens> {
        let token_version = self
            .store
            .increment_token_version(user_id)
            .await?
            .ok_or(GatewayError::UserNotFound)?;
        let sessions_removed = self.store.delete_user_sessions(user_id).await?;
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::UserTokensRevoked,
                AuditStatus::Success,
                AuditDetails::TokensRevoked {
                    token_version,
                    sessions_removed,
                },
            )
            .user(Some(user_id)),
        );
        info!(user_id = %user_id, token_version, sessions_removed, "revoked all session tokens");
        Ok(RevokedTokens {
            token_version,
            sessions_removed,
        })
    }

    /// Audit listing, newest first. The limit is clamped to `1..=200`.
    pub async fn list_audit(&self, mut filter: AuditFilter) -> Result<Vec<AuditLogEntry>> {
        filter.limit = if filter.limit <= 0 {
            DEFAULT_AUDIT_PAGE
        } else {
            filter.limit.min(MAX_AUDIT_PAGE)
        };
        Ok(self.store.list_audit(&filter).await?)
    }

    /// Failure pattern for an IP or email. `project_id` confines the count to
    /// one project's audit records; operators pass `None` to see everything.
    pub async fn detect_brute_force(
        &self,
        identifier: &str,
        project_id: Option<Uuid>,
    ) -> Result<BruteForceAssessment> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(GatewayError::InvalidRequest("identifier is required".into()));
        }
        Ok(brute_force::detect(
            self.store(),
            identifier,
            project_id,
            &self.settings.brute_force,
            Utc::now(),
        )
        .await?)
    }

    /// Delete expired codes, setup codes and rate-limit windows.
    pub async fn prune_expired(&self) -> Result<u64> {
        let removed = self.store.prune_expired(Utc::now()).await?;
        info!(removed, "pruned expired rows");
        Ok(removed)
    }
}
