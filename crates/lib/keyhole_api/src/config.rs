//! API server configuration.

use std::fmt;

use chrono::Duration;
use keyhole_core::GatewaySettings;
use keyhole_core::auth::session_token::resolve_session_secret;

/// Configuration for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3200").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// Session token signing secret.
    pub session_secret: String,
    /// HTTPS-only redirect URIs outside loopback.
    pub production: bool,
    /// Take the client IP from `CF-Connecting-IP` / `X-Real-IP` /
    /// `X-Forwarded-For`. Only enable behind a proxy that sets them.
    pub trust_proxy_headers: bool,
    pub idle_timeout_minutes: i64,
    pub session_token_ttl_hours: i64,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                  | Default                                   |
    /// |---------------------------|-------------------------------------------|
    /// | `BIND_ADDR`               | `127.0.0.1:3200`                          |
    /// | `DATABASE_URL`            | `postgres://localhost:5432/keyhole`       |
    /// | `SESSION_SECRET` / `JWT_SECRET` | generated & persisted to file       |
    /// | `KEYHOLE_ENV`             | `development` (`production` to harden)    |
    /// | `TRUST_PROXY_HEADERS`     | `false`                                   |
    /// | `IDLE_TIMEOUT_MINUTES`    | `30`                                      |
    /// | `SESSION_TOKEN_TTL_HOURS` | `168`                                     |
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3200".into()),
            pg_connection_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/keyhole".into()),
            session_secret: resolve_session_secret(),
            production: std::env::var("KEYHOLE_ENV")
                .is_ok_and(|v| v.eq_ignore_ascii_case("production")),
            trust_proxy_headers: env_flag("TRUST_PROXY_HEADERS"),
            idle_timeout_minutes: env_number("IDLE_TIMEOUT_MINUTES", 30),
            session_token_ttl_hours: env_number("SESSION_TOKEN_TTL_HOURS", 24 * 7),
        }
    }

    /// Gateway settings derived from this configuration.
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            production: self.production,
            idle_timeout: Duration::minutes(self.idle_timeout_minutes),
            session_token_ttl: Duration::hours(self.session_token_ttl_hours),
            ..GatewaySettings::default()
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("pg_connection_url", &redact_url(&self.pg_connection_url))
            .field("session_secret", &"<redacted>")
            .field("production", &self.production)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("idle_timeout_minutes", &self.idle_timeout_minutes)
            .field("session_token_ttl_hours", &self.session_token_ttl_hours)
            .finish()
    }
}

/// Mask the password of a connection URL. Unparsable URLs are hidden entirely.
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("redacted"));
            }
            parsed.to_string()
        }
        Err(_) if raw.is_empty() => String::new(),
        Err(_) => "<redacted>".to_string(),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

fn env_number(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}
