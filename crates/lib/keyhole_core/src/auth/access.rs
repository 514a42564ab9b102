//! Project access control.
//!
//! Public projects admit any authenticated user; private projects require a
//! membership row. The decision is read from the store on every call.

use std::fmt;

use uuid::Uuid;

use crate::models::Project;
use crate::store::{Result, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenial {
    ProjectNotFound,
    UserNotMember,
}

impl AccessDenial {
    pub fn reason(&self) -> &'static str {
        match self {
            AccessDenial::ProjectNotFound => "project_not_found",
            AccessDenial::UserNotMember => "user_not_member",
        }
    }
}

impl fmt::Display for AccessDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Clone)]
pub enum AccessDecision {
    Allowed(Project),
    Denied(AccessDenial),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed(_))
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            AccessDecision::Allowed(_) => None,
            AccessDecision::Denied(denial) => Some(denial.reason()),
        }
    }
}

pub async fn check_access(
    store: &dyn Store,
    user_id: Uuid,
    project_id: Uuid,
) -> Result<AccessDecision> {
    let Some(project) = store.find_project(project_id).await? else {
        return Ok(AccessDecision::Denied(AccessDenial::ProjectNotFound));
    };
    if project.is_public {
        return Ok(AccessDecision::Allowed(project));
    }
    match store.membership_role(user_id, project_id).await? {
        Some(_) => Ok(AccessDecision::Allowed(project)),
        None => Ok(AccessDecision::Denied(AccessDenial::UserNotMember)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn decision_table() {
        let store = MemoryStore::new();
        let user = store.add_user("ana@example.com");
        let public = store.add_project("open", None, true, "kh_a");
        let private = store.add_project("closed", None, false, "kh_b");

        let missing = check_access(&store, user.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(missing.reason(), Some("project_not_found"));

        assert!(check_access(&store, user.id, public.id).await.unwrap().is_allowed());

        let denied = check_access(&store, user.id, private.id).await.unwrap();
        assert_eq!(denied.reason(), Some("user_not_member"));

        store.add_membership(user.id, private.id, "member");
        assert!(check_access(&store, user.id, private.id).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn visibility_change_applies_on_next_check() {
        let store = MemoryStore::new();
        let user = store.add_user("ben@example.com");
        let project = store.add_project("flip", None, true, "kh_c");

        assert!(check_access(&store, user.id, project.id).await.unwrap().is_allowed());
        store.set_project_public(project.id, false);
        assert!(!check_access(&store, user.id, project.id).await.unwrap().is_allowed());
    }
}
