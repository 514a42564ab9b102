//! The authentication gateway.
//!
//! [`Gateway`] composes the store, rate limiter, token service, session
//! registry and audit logger into the boundary operations: code issuance and
//! exchange, session verification and logout, and the administrative paths.

mod admin;
mod exchange;
mod verify;

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::audit::AuditLogger;
use crate::auth::session_token::SessionTokenService;
use crate::config::GatewaySettings;
use crate::error::{GatewayError, Result};
use crate::models::{AuditAction, AuditDetails, AuditStatus, ClientInfo, NewAuditEntry};
use crate::rate_limit::{LimitClass, RateLimitDecision, RateLimiter};
use crate::store::Store;

pub use admin::{IssuedSetupCode, RevokedTokens, SessionSummary, SetupBootstrap};
pub use exchange::{ExchangeOutcome, ExchangeRequest, IssueCodeRequest};
pub use verify::VerifiedSession;

/// Largest page the audit listing returns.
pub const MAX_AUDIT_PAGE: i64 = 200;
pub const DEFAULT_AUDIT_PAGE: i64 = 50;

pub struct Gateway {
    store: Arc<dyn Store>,
    tokens: SessionTokenService,
    audit: AuditLogger,
    limiter: RateLimiter,
    settings: GatewaySettings,
}

impl Gateway {
    /// Build a gateway and start its audit writer. Must be called from
    /// within a Tokio runtime.
    pub fn new(store: Arc<dyn Store>, secret: &[u8], settings: GatewaySettings) -> Self {
        let tokens = SessionTokenService::new(secret, settings.session_token_ttl);
        let audit = AuditLogger::spawn(store.clone(), settings.audit_queue_capacity);
        let limiter = RateLimiter::new(store.clone());
        info!(
            production = settings.production,
            idle_timeout_secs = settings.idle_timeout.num_seconds(),
            "gateway ready"
        );
        Self {
            store,
            tokens,
            audit,
            limiter,
            settings,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn tokens(&self) -> &SessionTokenService {
        &self.tokens
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Count a request against `class` for this client; over the limit the
    /// request is refused with [`GatewayError::RateLimited`] and audited.
    pub async fn enforce_rate_limit(
        &self,
        class: LimitClass,
        client: &ClientInfo,
    ) -> Result<RateLimitDecision> {
        let policy = self.settings.rate_limits.policy(class);
        let identity = client.rate_limit_identity();
        let decision = self.limiter.check(identity, policy, Utc::now()).await?;
        if decision.allowed {
            return Ok(decision);
        }
        let retry_after_ms = decision.retry_after_ms.unwrap_or(0);
        self.audit.record(
            NewAuditEntry::new(
                AuditAction::RateLimitExceeded,
                AuditStatus::Failure,
                AuditDetails::RateLimited {
                    key: policy.key(identity),
                    retry_after_ms,
                },
            )
            .client(client),
        );
        Err(GatewayError::RateLimited { retry_after_ms })
    }

    /// Store reachability, for health checks.
    pub async fn ping(&self) -> Result<()> {
        Ok(self.store.ping().await?)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::rate_limit::RateLimitPolicy;

    #[tokio::test]
    async fn rate_limit_denial_is_audited() {
        let mut settings = GatewaySettings::default();
        settings.rate_limits.api = RateLimitPolicy::new("api", chrono::Duration::minutes(1), 1);
        let (store, gateway) = gateway(settings);
        let client = client("4.4.4.4");

        gateway.enforce_rate_limit(LimitClass::Api, &client).await.unwrap();
        match gateway.enforce_rate_limit(LimitClass::Api, &client).await {
            Err(GatewayError::RateLimited { retry_after_ms }) => assert!(retry_after_ms > 0),
            other => panic!("expected rate limit, got {other:?}"),
        }
        gateway.audit().flush().await;

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "rate_limit.exceeded");
        assert_eq!(entries[0].ip_address.as_deref(), Some("4.4.4.4"));
    }
}
