//! Best-effort audit trail.
//!
//! Entries go onto a bounded queue drained by one background task. Callers
//! never wait on the database: a full or closed queue drops the entry with a
//! warning, and write failures are logged and swallowed.

pub mod brute_force;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::models::NewAuditEntry;
use crate::store::{Store, StoreError};

enum Command {
    Write(Box<NewAuditEntry>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit writer task. Cheap to clone.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<Command>,
}

impl AuditLogger {
    /// Start the writer task on the current runtime.
    pub fn spawn(store: Arc<dyn Store>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Write(entry) => write_entry(store.as_ref(), &entry).await,
                    Command::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("audit writer stopped");
        });
        Self { tx }
    }

    /// Queue an entry without waiting.
    pub fn record(&self, entry: NewAuditEntry) {
        let action = entry.action;
        match self.tx.try_send(Command::Write(Box::new(entry))) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(action = %action, "audit queue full, dropping entry");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(action = %action, "audit writer stopped, dropping entry");
            }
        }
    }

    /// Wait until everything queued before this call has been attempted.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

/// Write one entry, retrying once without user/project references when
/// they point at rows deleted in the meantime.
pub async fn write_entry(store: &dyn Store, entry: &NewAuditEntry) {
    match store.insert_audit(entry).await {
        Ok(()) => {}
        Err(StoreError::ForeignKeyViolation(constraint)) => {
            debug!(
                action = %entry.action,
                %constraint,
                "audit reference dangling, retrying detached"
            );
            if let Err(e) = store.insert_audit(&entry.detached()).await {
                warn!(action = %entry.action, error = %e, "failed to write audit entry");
            }
        }
        Err(e) => {
            warn!(action = %entry.action, error = %e, "failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::{AuditAction, AuditDetails, AuditStatus};
    use crate::store::MemoryStore;

    fn entry() -> NewAuditEntry {
        NewAuditEntry::new(
            AuditAction::SessionLogout,
            AuditStatus::Success,
            AuditDetails::SessionEnded {
                initiator: "user".into(),
            },
        )
    }

    #[tokio::test]
    async fn dangling_references_are_nulled() {
        let store = MemoryStore::new();
        let user = store.add_user("fay@example.com");
        write_entry(&store, &entry().user(Some(user.id)).project(Some(Uuid::new_v4()))).await;

        let written = store.audit_entries();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].user_id, None);
        assert_eq!(written[0].project_id, None);
    }

    #[tokio::test]
    async fn outage_is_swallowed() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::spawn(store.clone(), 8);
        store.fail_audit_writes(1);

        logger.record(entry());
        logger.record(entry());
        logger.flush().await;

        assert_eq!(store.audit_entries().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::spawn(store.clone(), 1);
        for _ in 0..100 {
            logger.record(entry());
        }
        logger.flush().await;
        let written = store.audit_entries().len();
        assert!((1..=100).contains(&written));
    }
}
