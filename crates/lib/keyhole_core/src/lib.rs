//! # keyhole_core
//!
//! Authentication gateway core for Keyhole: authorization codes, PKCE,
//! redirect policy, rate limiting, session tokens with a kill switch,
//! idle-timeout session tracking, project access control and auditing.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod store;

pub use config::GatewaySettings;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
