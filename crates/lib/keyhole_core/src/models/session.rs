//! Session and rate-limit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// "This user is logged into this project." At most one row per (user, project).
///
/// Logout and admin revocation set `ended_at` instead of deleting the row, so
/// tokens issued up to that instant stay rejected. A later exchange moves
/// `last_seen_at` past `ended_at` and the row is live again.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectSession {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub last_seen_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ProjectSession {
    /// Ended and not resumed by a later exchange.
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some_and(|ended| ended >= self.last_seen_at)
    }

    /// Whether a token issued at `issued_at` predates the last logout.
    pub fn revokes(&self, issued_at: DateTime<Utc>) -> bool {
        self.ended_at.is_some_and(|ended| issued_at <= ended)
    }
}

/// Fixed-window counter state returned by an atomic increment.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RateLimitEntry {
    pub key: String,
    pub count: i64,
    pub window_start: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
