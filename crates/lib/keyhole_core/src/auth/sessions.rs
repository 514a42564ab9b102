//! Session registry: one `last_seen_at` row per (user, project).

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::models::{ClientInfo, ProjectSession};
use crate::store::{Result, Store};

/// Idle once strictly more than `threshold` has passed since the last touch.
pub fn is_idle(session: &ProjectSession, threshold: Duration, now: DateTime<Utc>) -> bool {
    now - session.last_seen_at > threshold
}

/// Whether the previous touch is old enough to be worth another write.
pub fn needs_touch(session: &ProjectSession, interval: Duration, now: DateTime<Utc>) -> bool {
    now - session.last_seen_at >= interval
}

/// Upsert the session row, refreshing `last_seen_at` and client metadata.
pub async fn touch(
    store: &dyn Store,
    user_id: Uuid,
    project_id: Uuid,
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> Result<ProjectSession> {
    store.upsert_session(user_id, project_id, client, now).await
}

/// Outcome of the idle check performed during verification.
#[derive(Debug, Clone)]
pub enum SessionCheck {
    /// No row existed; one was created.
    Untracked(ProjectSession),
    Active { touched: bool },
    Idle { last_seen_at: DateTime<Utc> },
    /// The token was issued before the session was logged out or revoked.
    Ended { ended_at: DateTime<Utc> },
}

/// Idle check plus coalesced touch. Idle and ended rows are left in place so
/// the same token keeps failing until a fresh exchange refreshes them.
///
/// `issued_at` is the token's `iat`. Tokens issued at or before the row's
/// `ended_at` are refused.
#[allow(clippy::too_many_arguments)]
pub async fn check_and_touch(
    store: &dyn Store,
    user_id: Uuid,
    project_id: Uuid,
    client: &ClientInfo,
    issued_at: DateTime<Utc>,
    idle_timeout: Duration,
    touch_interval: Duration,
    now: DateTime<Utc>,
) -> Result<SessionCheck> {
    let Some(session) = store.find_session(user_id, project_id).await? else {
        let created = touch(store, user_id, project_id, client, now).await?;
        debug!(user_id = %user_id, project_id = %project_id, "started tracking session");
        return Ok(SessionCheck::Untracked(created));
    };
    if let Some(ended_at) = session.ended_at
        && session.revokes(issued_at)
    {
        return Ok(SessionCheck::Ended { ended_at });
    }
    if is_idle(&session, idle_timeout, now) {
        return Ok(SessionCheck::Idle {
            last_seen_at: session.last_seen_at,
        });
    }
    if needs_touch(&session, touch_interval, now) {
        touch(store, user_id, project_id, client, now).await?;
        return Ok(SessionCheck::Active { touched: true });
    }
    Ok(SessionCheck::Active { touched: false })
}
