//! Authorization code issuance and the code-for-token exchange.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::Gateway;
use crate::auth::access::{AccessDecision, check_access};
use crate::auth::codes::{self, IssuedCode, RedeemError};
use crate::auth::{pkce, redirect};
use crate::error::{GatewayError, Result};
use crate::models::{
    AuditAction, AuditDetails, AuditStatus, ClientInfo, NewAuditEntry, Project, ProjectSession,
    User,
};
use crate::rate_limit::LimitClass;

/// Message shared by every unknown, used or expired code so clients cannot
/// tell them apart.
const INVALID_CODE: &str = "Invalid or expired authorization code";

/// Parameters of a token exchange, as received from the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExchangeRequest {
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub user: User,
    pub project: Project,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub session: ProjectSession,
}

/// Parameters for minting a code after a completed login.
#[derive(Debug, Clone)]
pub struct IssueCodeRequest {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// Defaults to the configured SSO code TTL.
    pub ttl: Option<Duration>,
}

/// What is known about a failing exchange, for its audit record.
#[derive(Default)]
struct FailureContext<'a> {
    user_id: Option<Uuid>,
    project_id: Option<Uuid>,
    user_email: Option<&'a str>,
    redirect_uri: Option<&'a str>,
}

impl Gateway {
    /// Mint a one-time authorization code for `user_id` on `project_id`.
    pub async fn issue_code(&self, req: IssueCodeRequest) -> Result<IssuedCode> {
        let project = self
            .store
            .find_project(req.project_id)
            .await?
            .ok_or(GatewayError::ProjectNotFound)?;

        if let Err(rejection) = redirect::validate_redirect_uri(
            &req.redirect_uri,
            project.domain.as_deref(),
            self.settings.production,
        ) {
            warn!(
                project_id = %project.id,
                reason = rejection.reason(),
                "refusing to issue code for redirect URI"
            );
            return Err(GatewayError::InvalidRedirectUri(rejection));
        }

        let pkce = match (&req.code_challenge, &req.code_challenge_method) {
            (Some(challenge), method) => Some(
                pkce::parse_challenge(challenge, method.as_deref())
                    .map_err(GatewayError::InvalidRequest)?,
            ),
            (None, Some(_)) => {
                return Err(GatewayError::InvalidRequest(
                    "code_challenge_method given without code_challenge".into(),
                ));
            }
            (None, None) => None,
        };

        self.store
            .find_user(req.user_id)
            .await?
            .ok_or(GatewayError::UserNotFound)?;
        if let AccessDecision::Denied(denial) =
            check_access(self.store(), req.user_id, project.id).await?
        {
            return Err(GatewayError::AccessDenied(denial));
        }

        let ttl = req.ttl.unwrap_or(self.settings.sso_code_ttl);
        Ok(codes::issue(
            self.store(),
            req.user_id,
            project.id,
            &req.redirect_uri,
            ttl,
            pkce,
        )
        .await?)
    }

    /// Exchange an authorization code for a session token.
    ///
    /// `scope` restricts the lookup to one project (the API-key variant).
    /// Steps run in a fixed order and the code is marked used before any
    /// further side effect.
    pub async fn exchange_code(
        &self,
        req: &ExchangeRequest,
        scope: Option<&Project>,
        client: &ClientInfo,
    ) -> Result<ExchangeOutcome> {
        self.enforce_rate_limit(LimitClass::TokenExchange, client)
            .await?;

        let code = req.code.as_deref().map(str::trim).unwrap_or_default();
        let redirect_uri = req.redirect_uri.as_deref().map(str::trim).unwrap_or_default();
        if code.is_empty() || redirect_uri.is_empty() {
            let ctx = FailureContext {
                project_id: scope.map(|p| p.id),
                ..Default::default()
            };
            self.exchange_failed(client, "missing_parameters", ctx);
            return Err(GatewayError::InvalidRequest(
                "code and redirect_uri are required".into(),
            ));
        }
        let context = || FailureContext {
            project_id: scope.map(|p| p.id),
            redirect_uri: Some(redirect_uri),
            ..Default::default()
        };

        let code_hash = codes::hash_code(code);
        let Some(stored) = self
            .store
            .find_unused_code(&code_hash, scope.map(|p| p.id))
            .await?
        else {
            self.exchange_failed(client, "code_not_found", context());
            return Err(GatewayError::InvalidGrant(INVALID_CODE.into()));
        };
        let context = || FailureContext {
            user_id: Some(stored.user_id),
            project_id: Some(stored.project_id),
            ..context()
        };

        if stored.redirect_uri != redirect_uri {
            self.exchange_failed(client, "redirect_uri_mismatch", context());
            return Err(GatewayError::RedirectUriMismatch);
        }

        if let Some(challenge) = stored.code_challenge.as_deref() {
            let Some(verifier) = req.code_verifier.as_deref() else {
                self.exchange_failed(client, "missing_code_verifier", context());
                return Err(GatewayError::InvalidRequest("code_verifier is required".into()));
            };
            if !pkce::verify(verifier, challenge) {
                self.exchange_failed(client, "pkce_mismatch", context());
                return Err(GatewayError::InvalidPkce("code_verifier does not match".into()));
            }
        }

        let now = Utc::now();
        if stored.is_expired(now) {
            self.exchange_failed(client, "code_expired", context());
            return Err(GatewayError::ExpiredCode);
        }

        let redeemed = match codes::redeem_hash(self.store(), &code_hash, now).await {
            Ok(redeemed) => redeemed,
            Err(RedeemError::Expired) => {
                self.exchange_failed(client, "code_expired", context());
                return Err(GatewayError::ExpiredCode);
            }
            Err(RedeemError::NotFound | RedeemError::AlreadyUsed) => {
                self.exchange_failed(client, "code_already_used", context());
                return Err(GatewayError::InvalidGrant(INVALID_CODE.into()));
            }
            Err(RedeemError::Store(e)) => return Err(e.into()),
        };

        let Some(user) = self.store.find_user(redeemed.user_id).await? else {
            self.exchange_failed(client, "user_not_found", context());
            return Err(GatewayError::UserNotFound);
        };
        let context = || FailureContext {
            user_email: Some(user.email.as_str()),
            ..context()
        };

        let project = match check_access(self.store(), user.id, redeemed.project_id).await? {
            AccessDecision::Allowed(project) => project,
            AccessDecision::Denied(denial) => {
                self.exchange_failed(client, denial.reason(), context());
                return Err(GatewayError::AccessDenied(denial));
            }
        };

        let session = self
            .store
            .upsert_session(user.id, project.id, client, now)
            .await?;

        self.audit.record(
            NewAuditEntry::new(
                AuditAction::TokenExchange,
                AuditStatus::Success,
                AuditDetails::TokenExchange {
                    redirect_uri: Some(redeemed.redirect_uri.clone()),
                    project_name: Some(project.name.clone()),
                    user_email: Some(user.email.clone()),
                    reason: None,
                },
            )
            .user(Some(user.id))
            .project(Some(project.id))
            .client(client),
        );

        let issued = self.tokens.issue(user.id, project.id, user.token_version)?;
        info!(user_id = %user.id, project_id = %project.id, "authorization code exchanged");

        Ok(ExchangeOutcome {
            user,
            project,
            session_token: issued.token,
            expires_at: issued.expires_at,
            session,
        })
    }

    fn exchange_failed(&self, client: &ClientInfo, reason: &str, ctx: FailureContext<'_>) {
        info!(
            reason,
            user_id = ?ctx.user_id,
            project_id = ?ctx.project_id,
            ip = client.rate_limit_identity(),
            "token exchange refused"
        );
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::TokenExchange,
                AuditStatus::Failure,
                AuditDetails::TokenExchange {
                    redirect_uri: ctx.redirect_uri.map(str::to_string),
                    project_name: None,
                    user_email: ctx.user_email.map(str::to_string),
                    reason: Some(reason.to_string()),
                },
            )
            .user(ctx.user_id)
            .project(ctx.project_id)
            .client(client),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::GatewaySettings;
    use crate::gateway::test_support::{client, gateway};
    use crate::store::Store;

    const REDIRECT: &str = "https://app.example/cb";

    fn issue_request(user: Uuid, project: Uuid) -> IssueCodeRequest {
        IssueCodeRequest {
            user_id: user,
            project_id: project,
            redirect_uri: REDIRECT.into(),
            code_challenge: None,
            code_challenge_method: None,
            ttl: None,
        }
    }

    fn exchange(code: &str, redirect_uri: &str) -> ExchangeRequest {
        ExchangeRequest {
            code: Some(code.into()),
            redirect_uri: Some(redirect_uri.into()),
            code_verifier: None,
        }
    }

    #[tokio::test]
    async fn code_exchanges_once() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("gil@example.com");
        let project = store.add_project("app", Some("app.example"), true, "kh_app");
        let issued = gateway.issue_code(issue_request(user.id, project.id)).await.unwrap();
        let client = client("1.1.1.1");

        let outcome = gateway
            .exchange_code(&exchange(&issued.code, REDIRECT), None, &client)
            .await
            .unwrap();
        assert_eq!(outcome.user.id, user.id);
        assert_eq!(outcome.project.id, project.id);
        let claims = gateway.tokens().decode(&outcome.session_token).unwrap();
        assert_eq!(claims.ver, 0);

        let replay = gateway
            .exchange_code(&exchange(&issued.code, REDIRECT), None, &client)
            .await;
        assert!(matches!(replay, Err(GatewayError::InvalidGrant(_))));

        gateway.audit().flush().await;
        let statuses: Vec<_> = store.audit_entries().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![AuditStatus::Success, AuditStatus::Failure]);
    }

    #[tokio::test]
    async fn repeated_exchanges_keep_one_session() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("hal@example.com");
        let project = store.add_project("app", None, true, "kh_app");
        for _ in 0..3 {
            let issued = gateway.issue_code(issue_request(user.id, project.id)).await.unwrap();
            gateway
                .exchange_code(&exchange(&issued.code, REDIRECT), None, &client("1.1.1.2"))
                .await
                .unwrap();
        }
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn missing_parameters_and_redirect_mismatch() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("ida@example.com");
        let project = store.add_project("app", None, true, "kh_app");
        let issued = gateway.issue_code(issue_request(user.id, project.id)).await.unwrap();
        let client = client("1.1.1.3");

        let missing = ExchangeRequest {
            code: Some(issued.code.clone()),
            ..Default::default()
        };
        assert!(matches!(
            gateway.exchange_code(&missing, None, &client).await,
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            gateway
                .exchange_code(&exchange(&issued.code, "https://app.example/other"), None, &client)
                .await,
            Err(GatewayError::RedirectUriMismatch)
        ));
        // A mismatch does not burn the code.
        assert!(gateway
            .exchange_code(&exchange(&issued.code, REDIRECT), None, &client)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn pkce_is_enforced() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("jo@example.com");
        let project = store.add_project("app", None, true, "kh_app");
        let verifier = pkce::generate_code_verifier();
        let issued = gateway
            .issue_code(IssueCodeRequest {
                code_challenge: Some(pkce::compute_code_challenge(&verifier)),
                code_challenge_method: Some("S256".into()),
                ..issue_request(user.id, project.id)
            })
            .await
            .unwrap();
        let client = client("1.1.1.4");

        assert!(matches!(
            gateway.exchange_code(&exchange(&issued.code, REDIRECT), None, &client).await,
            Err(GatewayError::InvalidRequest(_))
        ));
        let wrong = ExchangeRequest {
            code_verifier: Some(pkce::generate_code_verifier()),
            ..exchange(&issued.code, REDIRECT)
        };
        assert!(matches!(
            gateway.exchange_code(&wrong, None, &client).await,
            Err(GatewayError::InvalidPkce(_))
        ));
        let right = ExchangeRequest {
            code_verifier: Some(verifier),
            ..exchange(&issued.code, REDIRECT)
        };
        assert!(gateway.exchange_code(&right, None, &client).await.is_ok());
    }

    #[tokio::test]
    async fn plain_pkce_is_refused_at_issue() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("kai@example.com");
        let project = store.add_project("app", None, true, "kh_app");
        let result = gateway
            .issue_code(IssueCodeRequest {
                code_challenge: Some(pkce::generate_code_verifier()),
                code_challenge_method: Some("plain".into()),
                ..issue_request(user.id, project.id)
            })
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn issue_rejects_foreign_redirects() {
        let (store, gateway) = gateway(GatewaySettings {
            production: true,
            ..Default::default()
        });
        let user = store.add_user("lu@example.com");
        let project = store.add_project("app", Some("app.example"), true, "kh_app");
        let result = gateway
            .issue_code(IssueCodeRequest {
                redirect_uri: "https://evil-app.example/cb".into(),
                ..issue_request(user.id, project.id)
            })
            .await;
        match result {
            Err(GatewayError::InvalidRedirectUri(rejection)) => {
                assert_eq!(rejection.reason(), "domain_mismatch")
            }
            other => panic!("expected redirect rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_code_is_unauthorized() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("mo@example.com");
        let project = store.add_project("app", None, true, "kh_app");
        let issued = gateway
            .issue_code(IssueCodeRequest {
                ttl: Some(Duration::seconds(-1)),
                ..issue_request(user.id, project.id)
            })
            .await
            .unwrap();
        assert!(matches!(
            gateway
                .exchange_code(&exchange(&issued.code, REDIRECT), None, &client("1.1.1.5"))
                .await,
            Err(GatewayError::ExpiredCode)
        ));
    }

    #[tokio::test]
    async fn private_project_requires_membership() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("ned@example.com");
        let project = store.add_project("team", None, true, "kh_team");
        let issued = gateway.issue_code(issue_request(user.id, project.id)).await.unwrap();
        store.set_project_public(project.id, false);

        let denied = gateway
            .exchange_code(&exchange(&issued.code, REDIRECT), None, &client("1.1.1.6"))
            .await;
        assert!(matches!(denied, Err(GatewayError::AccessDenied(_))));
        // The code was consumed before the access check.
        let code_hash = codes::hash_code(&issued.code);
        assert!(store.find_unused_code(&code_hash, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleted_user_is_not_found() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("oz@example.com");
        let project = store.add_project("app", None, true, "kh_app");
        let issued = gateway.issue_code(issue_request(user.id, project.id)).await.unwrap();
        store.remove_user(user.id);
        assert!(matches!(
            gateway
                .exchange_code(&exchange(&issued.code, REDIRECT), None, &client("1.1.1.7"))
                .await,
            Err(GatewayError::UserNotFound)
        ));
        // The failure audit for a deleted user is still written, detached.
        gateway.audit().flush().await;
        assert_eq!(store.audit_entries()[0].user_id, None);
    }

    #[tokio::test]
    async fn scoped_exchange_ignores_other_projects() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let user = store.add_user("pia@example.com");
        let mine = store.add_project("mine", None, true, "kh_mine");
        let theirs = store.add_project("theirs", None, true, "kh_theirs");
        let issued = gateway.issue_code(issue_request(user.id, theirs.id)).await.unwrap();
        let client = client("1.1.1.8");

        assert!(matches!(
            gateway
                .exchange_code(&exchange(&issued.code, REDIRECT), Some(&mine), &client)
                .await,
            Err(GatewayError::InvalidGrant(_))
        ));
        assert!(gateway
            .exchange_code(&exchange(&issued.code, REDIRECT), Some(&theirs), &client)
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_exchanges_have_one_winner() {
        let (store, gateway) = gateway(GatewaySettings::default());
        let gateway = Arc::new(gateway);
        let user = store.add_user("quin@example.com");
        let project = store.add_project("app", None, true, "kh_app");
        let issued = gateway.issue_code(issue_request(user.id, project.id)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let gateway = gateway.clone();
            let request = exchange(&issued.code, REDIRECT);
            handles.push(tokio::spawn(async move {
                gateway
                    .exchange_code(&request, None, &client(&format!("10.0.0.{i}")))
                    .await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(GatewayError::InvalidGrant(_)) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.session_count(), 1);
    }
}
