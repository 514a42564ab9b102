//! Brute-force detection over recent audit failures.
//!
//! Advisory only: the result is shown to operators and never blocks a
//! request by itself.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::store::{Result, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BruteForcePolicy {
    pub window: Duration,
    pub threshold: usize,
}

impl Default for BruteForcePolicy {
    fn default() -> Self {
        Self {
            window: Duration::minutes(15),
            threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BruteForceAssessment {
    pub identifier: String,
    pub failed_attempts: usize,
    pub flagged: bool,
    /// Time until the oldest failure in the window ages out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<i64>,
}

/// Assess failure timestamps (oldest first) already limited to the window.
pub fn assess(
    identifier: &str,
    failures: &[DateTime<Utc>],
    policy: &BruteForcePolicy,
    now: DateTime<Utc>,
) -> BruteForceAssessment {
    let flagged = failures.len() >= policy.threshold;
    let retry_after_ms = match failures.first() {
        Some(oldest) if flagged => {
            Some((*oldest + policy.window - now).num_milliseconds().max(0))
        }
        _ => None,
    };
    BruteForceAssessment {
        identifier: identifier.to_string(),
        failed_attempts: failures.len(),
        flagged,
        retry_after_ms,
    }
}

/// Look up failures for `identifier` (IP address or email) and assess them.
/// With `project_id` set, only that project's failures count.
pub async fn detect(
    store: &dyn Store,
    identifier: &str,
    project_id: Option<Uuid>,
    policy: &BruteForcePolicy,
    now: DateTime<Utc>,
) -> Result<BruteForceAssessment> {
    let failures = store
        .failure_times(identifier, project_id, now - policy.window)
        .await?;
    Ok(assess(identifier, &failures, policy, now))
}
