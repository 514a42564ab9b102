//! Gateway settings, passed explicitly to [`Gateway::new`](crate::gateway::Gateway::new).

use chrono::Duration;

use crate::audit::brute_force::BruteForcePolicy;
use crate::rate_limit::RateLimits;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Lifetime of issued session tokens.
    pub session_token_ttl: Duration,
    /// Sessions untouched for longer than this fail verification.
    pub idle_timeout: Duration,
    /// Minimum gap between two `last_seen_at` writes for one session.
    pub touch_interval: Duration,
    pub sso_code_ttl: Duration,
    pub setup_code_ttl: Duration,
    /// Enforces HTTPS and default ports on non-loopback redirect URIs.
    pub production: bool,
    pub rate_limits: RateLimits,
    pub brute_force: BruteForcePolicy,
    pub audit_queue_capacity: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            session_token_ttl: Duration::days(7),
            idle_timeout: Duration::minutes(30),
            touch_interval: Duration::seconds(60),
            sso_code_ttl: Duration::minutes(5),
            setup_code_ttl: Duration::seconds(60),
            production: false,
            rate_limits: RateLimits::default(),
            brute_force: BruteForcePolicy::default(),
            audit_queue_capacity: 1024,
        }
    }
}
