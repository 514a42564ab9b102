//! Fixed-window rate limiting backed by the store.
//!
//! Each hit is one atomic increment in the store; the decision is computed
//! from the returned counter, so concurrent callers never under-count.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::models::RateLimitEntry;
use crate::store::{Result, Store};

/// A named window/limit pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub window: Duration,
    pub max_requests: i64,
}

impl RateLimitPolicy {
    pub const fn new(name: &'static str, window: Duration, max_requests: i64) -> Self {
        Self {
            name,
            window,
            max_requests,
        }
    }

    pub fn key(&self, identity: &str) -> String {
        format!("{}:{identity}", self.name)
    }
}

/// Endpoint classes, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    Authentication,
    TokenExchange,
    Api,
    SessionVerify,
}

/// The configured policy for every [`LimitClass`].
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub authentication: RateLimitPolicy,
    pub token_exchange: RateLimitPolicy,
    pub api: RateLimitPolicy,
    pub session_verify: RateLimitPolicy,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            authentication: RateLimitPolicy::new("auth", Duration::minutes(15), 10),
            token_exchange: RateLimitPolicy::new("token", Duration::minutes(1), 30),
            api: RateLimitPolicy::new("api", Duration::minutes(1), 60),
            session_verify: RateLimitPolicy::new("verify", Duration::minutes(1), 300),
        }
    }
}

impl RateLimits {
    pub fn policy(&self, class: LimitClass) -> &RateLimitPolicy {
        match class {
            LimitClass::Authentication => &self.authentication,
            LimitClass::TokenExchange => &self.token_exchange,
            LimitClass::Api => &self.api,
            LimitClass::SessionVerify => &self.session_verify,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<i64>,
}

impl RateLimitDecision {
    /// `Retry-After` header value: whole seconds, rounded up, at least 1.
    pub fn retry_after_secs(&self) -> Option<i64> {
        self.retry_after_ms.map(|ms| ((ms + 999) / 1000).max(1))
    }
}

/// Decide from the counter state after this request was counted.
pub fn evaluate(
    entry: &RateLimitEntry,
    policy: &RateLimitPolicy,
    now: DateTime<Utc>,
) -> RateLimitDecision {
    if entry.count <= policy.max_requests {
        RateLimitDecision {
            allowed: true,
            remaining: policy.max_requests - entry.count,
            reset_at: entry.expires_at,
            retry_after_ms: None,
        }
    } else {
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at: entry.expires_at,
            retry_after_ms: Some((entry.expires_at - now).num_milliseconds().max(0)),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Count one request for `identity` under `policy`.
    pub async fn check(
        &self,
        identity: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let key = policy.key(identity);
        let entry = self
            .store
            .hit_rate_limit(&key, now, now + policy.window)
            .await?;
        let decision = evaluate(&entry, policy, now);
        if !decision.allowed {
            debug!(key = %key, count = entry.count, "rate limit exceeded");
        }
        Ok(decision)
    }
}
