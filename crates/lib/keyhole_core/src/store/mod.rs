//! Persistence seam for the gateway.
//!
//! Every operation that concurrent requests can race on (code claim, rate-limit
//! increment, session upsert, token-version bump, key replacement) is a single
//! method here and must be implemented as one atomic statement.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditFilter, AuditLogEntry, AuthorizationCode, ClientInfo, NewAuditEntry,
    NewAuthorizationCode, Project, ProjectSession, RateLimitEntry, SetupCode, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // -- users & projects ---------------------------------------------------

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>>;

    /// Atomically bump `token_version`, returning the new value.
    async fn increment_token_version(&self, user_id: Uuid) -> Result<Option<i64>>;

    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>>;

    async fn find_project_by_api_key(&self, api_key_hash: &str) -> Result<Option<Project>>;

    /// Replace the project's API key hash. The old key stops matching immediately.
    async fn replace_api_key(&self, project_id: Uuid, api_key_hash: &str) -> Result<bool>;

    async fn membership_role(&self, user_id: Uuid, project_id: Uuid) -> Result<Option<String>>;

    // -- authorization codes --------------------------------------------------

    async fn insert_code(&self, code: &NewAuthorizationCode) -> Result<()>;

    /// Look up an unused code, optionally scoped to one project.
    async fn find_unused_code(
        &self,
        code_hash: &str,
        project_id: Option<Uuid>,
    ) -> Result<Option<AuthorizationCode>>;

    /// Look up a code regardless of state (for classifying failed claims).
    async fn find_code(&self, code_hash: &str) -> Result<Option<AuthorizationCode>>;

    /// Mark an unused, unexpired code as used and return it. At most one
    /// concurrent caller gets `Some`.
    async fn claim_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>>;

    // -- setup codes ---------------------------------------------------------

    async fn insert_setup_code(
        &self,
        code_hash: &str,
        project_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Same single-winner semantics as [`Store::claim_code`].
    async fn claim_setup_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SetupCode>>;

    // -- sessions ------------------------------------------------------------

    async fn find_session(&self, user_id: Uuid, project_id: Uuid)
    -> Result<Option<ProjectSession>>;

    /// Insert or refresh the single session row for (user, project).
    async fn upsert_session(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<ProjectSession>;

    /// Live (not ended) sessions of a project, most recently seen first.
    async fn list_sessions(&self, project_id: Uuid) -> Result<Vec<ProjectSession>>;

    /// Mark the (user, project) session ended at `now`. Returns whether a live
    /// session was ended. When no row exists yet, a marker row is written so
    /// tokens issued before `now` stay rejected.
    async fn end_session(&self, user_id: Uuid, project_id: Uuid, now: DateTime<Utc>)
    -> Result<bool>;

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64>;

    // -- rate limiting -------------------------------------------------------

    /// Count one hit against `key`. Starts a fresh window when none is live.
    async fn hit_rate_limit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window_expires_at: DateTime<Utc>,
    ) -> Result<RateLimitEntry>;

    // -- audit ---------------------------------------------------------------

    async fn insert_audit(&self, entry: &NewAuditEntry) -> Result<()>;

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>>;

    /// Timestamps of failures recorded for `identifier` (IP or email) since
    /// `since`, oldest first. `project_id` limits the count to one project's
    /// records; `None` counts across all projects.
    async fn failure_times(
        &self,
        identifier: &str,
        project_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>>;

    // -- maintenance ---------------------------------------------------------

    /// Delete expired codes, setup codes and rate-limit windows.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}
