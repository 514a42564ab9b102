//! In-memory store for tests and local development.
//!
//! Each racy operation runs under the `DashMap` shard lock for its key, which
//! gives the same single-winner semantics as the conditional SQL statements.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{Result, Store, StoreError};
use crate::auth::api_keys::hash_api_key;
use crate::models::{
    AuditFilter, AuditLogEntry, AuthorizationCode, ClientInfo, NewAuditEntry,
    NewAuthorizationCode, Project, ProjectSession, RateLimitEntry, SetupCode, User,
};

#[derive(Debug, Clone)]
struct StoredProject {
    project: Project,
    api_key_hash: String,
}

/// [`Store`] kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    projects: DashMap<Uuid, StoredProject>,
    memberships: DashMap<(Uuid, Uuid), String>,
    codes: DashMap<String, AuthorizationCode>,
    setup_codes: DashMap<String, SetupCode>,
    sessions: DashMap<(Uuid, Uuid), ProjectSession>,
    rate_limits: DashMap<String, RateLimitEntry>,
    audit: Mutex<Vec<AuditLogEntry>>,
    failing_audit_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- seeding helpers -----------------------------------------------------

    pub fn add_user(&self, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: None,
            token_version: 0,
        };
        self.users.insert(user.id, user.clone());
        user
    }

    pub fn remove_user(&self, user_id: Uuid) {
        self.users.remove(&user_id);
        self.sessions.retain(|(uid, _), _| *uid != user_id);
        self.memberships.retain(|(uid, _), _| *uid != user_id);
    }

    /// Register a project reachable with the plaintext `api_key`.
    pub fn add_project(
        &self,
        slug: &str,
        domain: Option<&str>,
        is_public: bool,
        api_key: &str,
    ) -> Project {
        let project = Project {
            id: Uuid::new_v4(),
            name: slug.to_string(),
            slug: slug.to_string(),
            domain: domain.map(str::to_string),
            is_public,
        };
        self.projects.insert(
            project.id,
            StoredProject {
                project: project.clone(),
                api_key_hash: hash_api_key(api_key),
            },
        );
        project
    }

    pub fn remove_project(&self, project_id: Uuid) {
        self.projects.remove(&project_id);
        self.sessions.retain(|(_, pid), _| *pid != project_id);
    }

    pub fn set_project_public(&self, project_id: Uuid, is_public: bool) {
        if let Some(mut stored) = self.projects.get_mut(&project_id) {
            stored.project.is_public = is_public;
        }
    }

    pub fn add_membership(&self, user_id: Uuid, project_id: Uuid, role: &str) {
        self.memberships
            .insert((user_id, project_id), role.to_string());
    }

    /// Rewind a session's `last_seen_at`, simulating elapsed time.
    pub fn set_last_seen(&self, user_id: Uuid, project_id: Uuid, at: DateTime<Utc>) {
        if let Some(mut session) = self.sessions.get_mut(&(user_id, project_id)) {
            session.last_seen_at = at;
        }
    }

    /// Make the next `count` audit writes fail as if the database were down.
    pub fn fail_audit_writes(&self, count: u32) {
        self.failing_audit_writes.store(count, Ordering::SeqCst);
    }

    /// Number of live (not ended) session rows.
    pub fn session_count(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_ended()).count()
    }

    /// Drop a session row outright, as if it had never been tracked.
    pub fn forget_session(&self, user_id: Uuid, project_id: Uuid) {
        self.sessions.remove(&(user_id, project_id));
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    fn audit_write_should_fail(&self) -> bool {
        self.failing_audit_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.users.get(&user_id).map(|u| u.value().clone()))
    }

    async fn increment_token_version(&self, user_id: Uuid) -> Result<Option<i64>> {
        Ok(self.users.get_mut(&user_id).map(|mut user| {
            user.token_version += 1;
            user.token_version
        }))
    }

    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>> {
        Ok(self
            .projects
            .get(&project_id)
            .map(|p| p.project.clone()))
    }

    async fn find_project_by_api_key(&self, api_key_hash: &str) -> Result<Option<Project>> {
        Ok(self
            .projects
            .iter()
            .find(|p| p.api_key_hash == api_key_hash)
            .map(|p| p.project.clone()))
    }

    async fn replace_api_key(&self, project_id: Uuid, api_key_hash: &str) -> Result<bool> {
        Ok(match self.projects.get_mut(&project_id) {
            Some(mut stored) => {
                stored.api_key_hash = api_key_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn membership_role(&self, user_id: Uuid, project_id: Uuid) -> Result<Option<String>> {
        Ok(self
            .memberships
            .get(&(user_id, project_id))
            .map(|r| r.value().clone()))
    }

    async fn insert_code(&self, code: &NewAuthorizationCode) -> Result<()> {
        if !self.users.contains_key(&code.user_id) {
            return Err(StoreError::ForeignKeyViolation("authorization_codes.user_id".into()));
        }
        if !self.projects.contains_key(&code.project_id) {
            return Err(StoreError::ForeignKeyViolation(
                "authorization_codes.project_id".into(),
            ));
        }
        let (code_challenge, code_challenge_method) = match &code.pkce {
            Some(pkce) => (Some(pkce.challenge.clone()), Some(pkce.method.clone())),
            None => (None, None),
        };
        self.codes.insert(
            code.code_hash.clone(),
            AuthorizationCode {
                code_hash: code.code_hash.clone(),
                user_id: code.user_id,
                project_id: code.project_id,
                redirect_uri: code.redirect_uri.clone(),
                code_challenge,
                code_challenge_method,
                expires_at: code.expires_at,
                used_at: None,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn find_unused_code(
        &self,
        code_hash: &str,
        project_id: Option<Uuid>,
    ) -> Result<Option<AuthorizationCode>> {
        Ok(self
            .codes
            .get(code_hash)
            .filter(|c| c.used_at.is_none())
            .filter(|c| project_id.is_none_or(|pid| c.project_id == pid))
            .map(|c| c.value().clone()))
    }

    async fn find_code(&self, code_hash: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self.codes.get(code_hash).map(|c| c.value().clone()))
    }

    async fn claim_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>> {
        let Some(mut code) = self.codes.get_mut(code_hash) else {
            return Ok(None);
        };
        if code.used_at.is_some() || code.is_expired(now) {
            return Ok(None);
        }
        code.used_at = Some(now);
        Ok(Some(code.value().clone()))
    }

    async fn insert_setup_code(
        &self,
        code_hash: &str,
        project_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.projects.contains_key(&project_id) {
            return Err(StoreError::ForeignKeyViolation("setup_codes.project_id".into()));
        }
        self.setup_codes.insert(
            code_hash.to_string(),
            SetupCode {
                code_hash: code_hash.to_string(),
                project_id,
                expires_at,
                used_at: None,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn claim_setup_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SetupCode>> {
        let Some(mut code) = self.setup_codes.get_mut(code_hash) else {
            return Ok(None);
        };
        if code.used_at.is_some() || now >= code.expires_at {
            return Ok(None);
        }
        code.used_at = Some(now);
        Ok(Some(code.value().clone()))
    }

    async fn find_session(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<ProjectSession>> {
        Ok(self
            .sessions
            .get(&(user_id, project_id))
            .map(|s| s.value().clone()))
    }

    async fn upsert_session(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<ProjectSession> {
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::ForeignKeyViolation("project_sessions.user_id".into()));
        }
        let session = self
            .sessions
            .entry((user_id, project_id))
            .and_modify(|s| {
                s.last_seen_at = now;
                if client.ip_address.is_some() {
                    s.ip_address = client.ip_address.clone();
                }
                if client.user_agent.is_some() {
                    s.user_agent = client.user_agent.clone();
                }
            })
            .or_insert_with(|| ProjectSession {
                user_id,
                project_id,
                last_seen_at: now,
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
                created_at: now,
                ended_at: None,
            });
        Ok(session.value().clone())
    }

    async fn list_sessions(&self, project_id: Uuid) -> Result<Vec<ProjectSession>> {
        let mut sessions: Vec<ProjectSession> = self
            .sessions
            .iter()
            .filter(|s| s.project_id == project_id && !s.is_ended())
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(sessions)
    }

    async fn end_session(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if let Some(mut session) = self.sessions.get_mut(&(user_id, project_id)) {
            if session.is_ended() {
                return Ok(false);
            }
            session.ended_at = Some(now);
            return Ok(true);
        }
        if self.users.contains_key(&user_id) && self.projects.contains_key(&project_id) {
            self.sessions
                .entry((user_id, project_id))
                .or_insert_with(|| ProjectSession {
                    user_id,
                    project_id,
                    last_seen_at: now,
                    ip_address: None,
                    user_agent: None,
                    created_at: now,
                    ended_at: Some(now),
                });
        }
        Ok(false)
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let mut removed = 0;
        self.sessions.retain(|(uid, _), _| {
            let keep = *uid != user_id;
            removed += u64::from(!keep);
            keep
        });
        Ok(removed)
    }

    async fn hit_rate_limit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window_expires_at: DateTime<Utc>,
    ) -> Result<RateLimitEntry> {
        let mut entry = self
            .rate_limits
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                key: key.to_string(),
                count: 0,
                window_start: now,
                expires_at: window_expires_at,
            });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.window_start = now;
            entry.expires_at = window_expires_at;
        }
        entry.count += 1;
        Ok(entry.value().clone())
    }

    async fn insert_audit(&self, entry: &NewAuditEntry) -> Result<()> {
        if self.audit_write_should_fail() {
            return Err(StoreError::Unavailable("audit store offline".into()));
        }
        if let Some(user_id) = entry.user_id
            && !self.users.contains_key(&user_id)
        {
            return Err(StoreError::ForeignKeyViolation("audit_logs.user_id".into()));
        }
        if let Some(project_id) = entry.project_id
            && !self.projects.contains_key(&project_id)
        {
            return Err(StoreError::ForeignKeyViolation("audit_logs.project_id".into()));
        }
        let record = AuditLogEntry {
            id: Uuid::now_v7(),
            action: entry.action.as_str().to_string(),
            status: entry.status,
            user_id: entry.user_id,
            project_id: entry.project_id,
            ip_address: entry.ip_address.clone(),
            user_agent: entry.user_agent.clone(),
            metadata: entry.metadata.clone(),
            created_at: entry.created_at,
        };
        self.audit
            .lock()
            .map_err(|_| StoreError::Unavailable("audit log poisoned".into()))?
            .push(record);
        Ok(())
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let mut entries: Vec<AuditLogEntry> = self
            .audit_entries()
            .into_iter()
            .filter(|e| filter.project_id.is_none_or(|pid| e.project_id == Some(pid)))
            .filter(|e| filter.action.is_none_or(|a| e.action == a.as_str()))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(filter.limit.max(0) as usize);
        Ok(entries)
    }

    async fn failure_times(
        &self,
        identifier: &str,
        project_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let mut times: Vec<DateTime<Utc>> = self
            .audit_entries()
            .into_iter()
            .filter(|e| e.status == crate::models::AuditStatus::Failure && e.created_at > since)
            .filter(|e| project_id.is_none_or(|pid| e.project_id == Some(pid)))
            .filter(|e| {
                e.ip_address.as_deref() == Some(identifier)
                    || e.metadata.user_email() == Some(identifier)
            })
            .map(|e| e.created_at)
            .collect();
        times.sort();
        Ok(times)
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0;
        let mut live = |expires_at: DateTime<Utc>| {
            let keep = expires_at > now;
            removed += u64::from(!keep);
            keep
        };
        self.codes.retain(|_, c| live(c.expires_at));
        self.setup_codes.retain(|_, c| live(c.expires_at));
        self.rate_limits.retain(|_, e| live(e.expires_at));
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn prune_counts_each_removed_row() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let project = store.add_project("app", None, true, "kh_app");
        store
            .insert_setup_code("old", project.id, now - Duration::seconds(1))
            .await
            .unwrap();
        store
            .insert_setup_code("new", project.id, now + Duration::minutes(1))
            .await
            .unwrap();
        store
            .hit_rate_limit("api:1.1.1.1", now - Duration::minutes(2), now - Duration::minutes(1))
            .await
            .unwrap();
        store
            .hit_rate_limit("api:2.2.2.2", now, now + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(store.prune_expired(now).await.unwrap(), 2);
        assert_eq!(store.prune_expired(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn user_sessions_removed_across_projects() {
        let store = MemoryStore::new();
        let user = store.add_user("gus@example.com");
        let other = store.add_user("hal@example.com");
        let client = ClientInfo::default();
        let now = Utc::now();
        for slug in ["a", "b"] {
            let project = store.add_project(slug, None, true, slug);
            store.upsert_session(user.id, project.id, &client, now).await.unwrap();
            store.upsert_session(other.id, project.id, &client, now).await.unwrap();
        }

        assert_eq!(store.delete_user_sessions(user.id).await.unwrap(), 2);
        assert_eq!(store.delete_user_sessions(user.id).await.unwrap(), 0);
        assert_eq!(store.session_count(), 2);
    }

    #[tokio::test]
    async fn ended_sessions_are_not_listed_until_resumed() {
        let store = MemoryStore::new();
        let user = store.add_user("ivy@example.com");
        let project = store.add_project("app", None, true, "kh_app");
        let client = ClientInfo::default();
        let t = Utc::now();
        store.upsert_session(user.id, project.id, &client, t).await.unwrap();

        assert!(store.end_session(user.id, project.id, t + Duration::seconds(1)).await.unwrap());
        assert!(store.list_sessions(project.id).await.unwrap().is_empty());

        store
            .upsert_session(user.id, project.id, &client, t + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(store.list_sessions(project.id).await.unwrap().len(), 1);
    }
}
