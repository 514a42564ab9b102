//! Session verification and logout.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::Gateway;
use crate::auth::SessionRejection;
use crate::auth::access::{AccessDecision, AccessDenial, check_access};
use crate::auth::session_token::SessionClaims;
use crate::auth::sessions::{SessionCheck, check_and_touch};
use crate::error::{GatewayError, Result};
use crate::models::{
    AuditAction, AuditDetails, AuditStatus, ClientInfo, NewAuditEntry, Project, User,
};
use crate::rate_limit::LimitClass;

#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub user: User,
    pub project: Project,
    pub claims: SessionClaims,
    /// The check created the session row.
    pub new_session: bool,
}

impl Gateway {
    /// Verify a session token. Authentication failures come back as
    /// [`GatewayError::SessionRejected`] with a stable reason.
    ///
    /// `expected_project` pins the token to one project (API-key callers).
    pub async fn verify_session(
        &self,
        token: &str,
        expected_project: Option<Uuid>,
        client: &ClientInfo,
    ) -> Result<VerifiedSession> {
        self.enforce_rate_limit(LimitClass::SessionVerify, client)
            .await?;
        let token = token.trim();
        if token.is_empty() {
            return Err(GatewayError::InvalidRequest("token is required".into()));
        }

        let verified = match self.tokens.verify(self.store(), token).await {
            Ok(verified) => verified,
            Err(GatewayError::SessionRejected(rejection)) => {
                let user_id = self.tokens.decode(token).ok().map(|c| c.sub);
                return Err(self.reject(rejection, user_id, None, client));
            }
            Err(e) => return Err(e),
        };
        let (user, claims) = (verified.user, verified.claims);

        if let Some(expected) = expected_project
            && expected != claims.pid
        {
            return Err(self.reject(
                SessionRejection::ProjectMismatch,
                Some(user.id),
                Some(expected),
                client,
            ));
        }

        let project = match check_access(self.store(), user.id, claims.pid).await? {
            AccessDecision::Allowed(project) => project,
            AccessDecision::Denied(denial) => {
                let rejection = match denial {
                    AccessDenial::ProjectNotFound => SessionRejection::ProjectNotFound,
                    AccessDenial::UserNotMember => SessionRejection::UserNotMember,
                };
                return Err(self.reject(rejection, Some(user.id), Some(claims.pid), client));
            }
        };

        let issued_at =
            DateTime::<Utc>::from_timestamp(claims.iat, 0).unwrap_or(DateTime::UNIX_EPOCH);
        let check = check_and_touch(
            self.store(),
            user.id,
            project.id,
            client,
            issued_at,
            self.settings.idle_timeout,
            self.settings.touch_interval,
            Utc::now(),
        )
        .await?;
        let new_session = match check {
            SessionCheck::Idle { last_seen_at } => {
                debug!(user_id = %user.id, project_id = %project.id, %last_seen_at, "session idle");
                return Err(self.reject(
                    SessionRejection::IdleTimeout,
                    Some(user.id),
                    Some(project.id),
                    client,
                ));
            }
            SessionCheck::Ended { ended_at } => {
                debug!(user_id = %user.id, project_id = %project.id, %ended_at, "session ended");
                return Err(self.reject(
                    SessionRejection::SessionRevoked,
                    Some(user.id),
                    Some(project.id),
                    client,
                ));
            }
            SessionCheck::Untracked(_) => true,
            SessionCheck::Active { .. } => false,
        };

        if new_session {
            self.audit.record(
                NewAuditEntry::new(
                    AuditAction::SessionVerify,
                    AuditStatus::Success,
                    AuditDetails::SessionVerify {
                        reason: None,
                        new_session: true,
                    },
                )
                .user(Some(user.id))
                .project(Some(project.id))
                .client(client),
            );
        }

        Ok(VerifiedSession {
            user,
            project,
            claims,
            new_session,
        })
    }

    /// End the session a token belongs to. The token, and every other token
    /// issued for the pair up to now, stops verifying. Returns whether a live
    /// session was ended.
    pub async fn logout(&self, token: &str, client: &ClientInfo) -> Result<bool> {
        self.enforce_rate_limit(LimitClass::Api, client).await?;
        let token = token.trim();
        if token.is_empty() {
            return Err(GatewayError::InvalidRequest("token is required".into()));
        }
        let claims = self
            .tokens
            .decode(token)
            .map_err(GatewayError::SessionRejected)?;
        let removed = self
            .store
            .end_session(claims.sub, claims.pid, Utc::now())
            .await?;
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::SessionLogout,
                AuditStatus::Success,
                AuditDetails::SessionEnded {
                    initiator: "user".into(),
                },
            )
            .user(Some(claims.sub))
            .project(Some(claims.pid))
            .client(client),
        );
        info!(user_id = %claims.sub, project_id = %claims.pid, removed, "session logged out");
        Ok(removed)
    }

    fn reject(
        &self,
        rejection: SessionRejection,
        user_id: Option<Uuid>,
        project_id: Option<Uuid>,
        client: &ClientInfo,
    ) -> GatewayError {
        debug!(reason = rejection.reason(), user_id = ?user_id, "session verification failed");
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::SessionVerify,
                AuditStatus::Failure,
                AuditDetails::SessionVerify {
                    reason: Some(rejection.reason().to_string()),
                    new_session: false,
                },
            )
            .user(user_id)
            .project(project_id)
            .client(client),
        );
        GatewayError::SessionRejected(rejection)
    }
}
