//! PostgreSQL store.
//!
//! Racy operations are single statements (`UPDATE ... RETURNING`,
//! `INSERT ... ON CONFLICT ... RETURNING`) so row locking in PostgreSQL
//! serializes concurrent callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Result, Store, StoreError};
use crate::models::{
    AuditFilter, AuditLogEntry, AuditMetadata, AuditStatus, AuthorizationCode, ClientInfo,
    NewAuditEntry, NewAuthorizationCode, Project, ProjectSession, RateLimitEntry, SetupCode, User,
};

const CODE_COLUMNS: &str = "code_hash, user_id, project_id, redirect_uri, code_challenge, \
     code_challenge_method, expires_at, used_at, created_at";

const SESSION_COLUMNS: &str =
    "user_id, project_id, last_seen_at, ip_address, user_agent, created_at, ended_at";

const PROJECT_COLUMNS: &str = "id, name, slug, domain, is_public";

type AuditRow = (
    Uuid,
    String,
    String,
    Option<Uuid>,
    Option<Uuid>,
    Option<String>,
    Option<String>,
    serde_json::Value,
    DateTime<Utc>,
);

/// [`Store`] backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map FK violations (SQLSTATE 23503) to their own variant so the audit
/// writer can retry with the dangling reference nulled out.
fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.is_foreign_key_violation()
    {
        return StoreError::ForeignKeyViolation(db.message().to_string());
    }
    StoreError::Sql(e)
}

fn audit_from_row(row: AuditRow) -> AuditLogEntry {
    let (id, action, status, user_id, project_id, ip_address, user_agent, metadata, created_at) =
        row;
    AuditLogEntry {
        id,
        action,
        status: AuditStatus::parse(&status).unwrap_or(AuditStatus::Failure),
        user_id,
        project_id,
        ip_address,
        user_agent,
        metadata: AuditMetadata::from_json(metadata),
        created_at,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, token_version FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn increment_token_version(&self, user_id: Uuid) -> Result<Option<i64>> {
        let version = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET token_version = token_version + 1 \
             WHERE id = $1 RETURNING token_version",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version)
    }

    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    async fn find_project_by_api_key(&self, api_key_hash: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE api_key_hash = $1"
        ))
        .bind(api_key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    async fn replace_api_key(&self, project_id: Uuid, api_key_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE projects SET api_key_hash = $2 WHERE id = $1")
            .bind(project_id)
            .bind(api_key_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn membership_role(&self, user_id: Uuid, project_id: Uuid) -> Result<Option<String>> {
        let role = sqlx::query_scalar::<_, String>(
            "SELECT role FROM project_memberships WHERE user_id = $1 AND project_id = $2",
        )
        .bind(user_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    async fn insert_code(&self, code: &NewAuthorizationCode) -> Result<()> {
        let (challenge, method) = match &code.pkce {
            Some(pkce) => (Some(pkce.challenge.as_str()), Some(pkce.method.as_str())),
            None => (None, None),
        };
        sqlx::query(
            "INSERT INTO authorization_codes \
             (code_hash, user_id, project_id, redirect_uri, \
              code_challenge, code_challenge_method, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&code.code_hash)
        .bind(code.user_id)
        .bind(code.project_id)
        .bind(&code.redirect_uri)
        .bind(challenge)
        .bind(method)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn find_unused_code(
        &self,
        code_hash: &str,
        project_id: Option<Uuid>,
    ) -> Result<Option<AuthorizationCode>> {
        let code = sqlx::query_as::<_, AuthorizationCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM authorization_codes \
             WHERE code_hash = $1 AND used_at IS NULL \
               AND ($2::uuid IS NULL OR project_id = $2)"
        ))
        .bind(code_hash)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn find_code(&self, code_hash: &str) -> Result<Option<AuthorizationCode>> {
        let code = sqlx::query_as::<_, AuthorizationCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM authorization_codes WHERE code_hash = $1"
        ))
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn claim_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>> {
        let code = sqlx::query_as::<_, AuthorizationCode>(&format!(
            "UPDATE authorization_codes SET used_at = $2 \
             WHERE code_hash = $1 AND used_at IS NULL AND expires_at > $2 \
             RETURNING {CODE_COLUMNS}"
        ))
        .bind(code_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn insert_setup_code(
        &self,
        code_hash: &str,
        project_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO setup_codes (code_hash, project_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(code_hash)
        .bind(project_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn claim_setup_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SetupCode>> {
        let code = sqlx::query_as::<_, SetupCode>(
            "UPDATE setup_codes SET used_at = $2 \
             WHERE code_hash = $1 AND used_at IS NULL AND expires_at > $2 \
             RETURNING code_hash, project_id, expires_at, used_at, created_at",
        )
        .bind(code_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn find_session(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<ProjectSession>> {
        let session = sqlx::query_as::<_, ProjectSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM project_sessions \
             WHERE user_id = $1 AND project_id = $2"
        ))
        .bind(user_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn upsert_session(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<ProjectSession> {
        let session = sqlx::query_as::<_, ProjectSession>(&format!(
            "INSERT INTO project_sessions \
             (user_id, project_id, last_seen_at, ip_address, user_agent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $3) \
             ON CONFLICT (user_id, project_id) DO UPDATE SET \
               last_seen_at = EXCLUDED.last_seen_at, \
               ip_address = COALESCE(EXCLUDED.ip_address, project_sessions.ip_address), \
               user_agent = COALESCE(EXCLUDED.user_agent, project_sessions.user_agent) \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(user_id)
        .bind(project_id)
        .bind(now)
        .bind(client.ip_address.as_deref())
        .bind(client.user_agent.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(session)
    }

    async fn list_sessions(&self, project_id: Uuid) -> Result<Vec<ProjectSession>> {
        let sessions = sqlx::query_as::<_, ProjectSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM project_sessions \
             WHERE project_id = $1 AND (ended_at IS NULL OR ended_at < last_seen_at) \
             ORDER BY last_seen_at DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn end_session(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let ended = sqlx::query(
            "UPDATE project_sessions SET ended_at = $3 \
             WHERE user_id = $1 AND project_id = $2 \
               AND (ended_at IS NULL OR ended_at < last_seen_at)",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if ended.rows_affected() > 0 {
            return Ok(true);
        }

        // Never tracked: leave an ended marker behind.
        sqlx::query(
            "INSERT INTO project_sessions \
             (user_id, project_id, last_seen_at, created_at, ended_at) \
             SELECT $1, $2, $3, $3, $3 \
             WHERE EXISTS (SELECT 1 FROM users WHERE id = $1) \
               AND EXISTS (SELECT 1 FROM projects WHERE id = $2) \
             ON CONFLICT (user_id, project_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(false)
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM project_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn hit_rate_limit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window_expires_at: DateTime<Utc>,
    ) -> Result<RateLimitEntry> {
        // In ON CONFLICT ... SET, the bare table name refers to the existing
        // row, so every CASE sees the old `expires_at`.
        let entry = sqlx::query_as::<_, RateLimitEntry>(
            "INSERT INTO rate_limit_entries (key, count, window_start, expires_at) \
             VALUES ($1, 1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET \
               count = CASE WHEN rate_limit_entries.expires_at <= $2 \
                            THEN 1 ELSE rate_limit_entries.count + 1 END, \
               window_start = CASE WHEN rate_limit_entries.expires_at <= $2 \
                            THEN $2 ELSE rate_limit_entries.window_start END, \
               expires_at = CASE WHEN rate_limit_entries.expires_at <= $2 \
                            THEN $3 ELSE rate_limit_entries.expires_at END \
             RETURNING key, count, window_start, expires_at",
        )
        .bind(key)
        .bind(now)
        .bind(window_expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn insert_audit(&self, entry: &NewAuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs \
             (id, action, status, user_id, project_id, \
              ip_address, user_agent, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(Uuid::now_v7())
        .bind(entry.action.as_str())
        .bind(entry.status.as_str())
        .bind(entry.user_id)
        .bind(entry.project_id)
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.metadata.to_json())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, action, status, user_id, project_id, \
                    ip_address, user_agent, metadata, created_at \
             FROM audit_logs \
             WHERE ($1::uuid IS NULL OR project_id = $1) \
               AND ($2::text IS NULL OR action = $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY created_at DESC \
             LIMIT $4",
        )
        .bind(filter.project_id)
        .bind(filter.action.map(|a| a.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(audit_from_row).collect())
    }

    async fn failure_times(
        &self,
        identifier: &str,
        project_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let times = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT created_at FROM audit_logs \
             WHERE status = 'failure' AND created_at > $2 \
               AND (ip_address = $1 OR metadata->>'user_email' = $1) \
               AND ($3::uuid IS NULL OR project_id = $3) \
             ORDER BY created_at ASC",
        )
        .bind(identifier)
        .bind(since)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(times)
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for table in ["authorization_codes", "setup_codes", "rate_limit_entries"] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at <= $1"))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
