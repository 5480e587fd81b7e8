//! Soft-delete retention sweep.
//!
//! Soft-deleted documents survive for a retention window so deletion is
//! reversible; a daily supervised task hard-deletes anything whose window
//! elapsed, cascading to chunks and the hash index.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::Result;
use crate::store::DocStore;

/// Default sweep interval (daily).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(86_400);

/// Hard-deletes every document whose retention window has elapsed.
///
/// Returns the number of documents removed.
///
/// # Errors
///
/// Returns an error if the store query or a delete fails.
pub fn sweep_once(store: &dyn DocStore, retention_days: i64) -> Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let expired = store.list_expired_documents(cutoff)?;

    for doc in &expired {
        store.hard_delete_document(&doc.id)?;
        info!(document = %doc.id, "retention sweep removed expired document");
    }
    Ok(expired.len())
}

/// Supervised daily sweep loop.
///
/// Runs until the shutdown signal flips to `true`; a tick observing
/// shutdown mid-sweep finishes its current document and exits.
pub async fn run_retention_sweep(
    store: Arc<dyn DocStore>,
    retention_days: i64,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first interval tick fires immediately; skip it so a fresh start
    // does not sweep before anything can expire.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweep_once(store.as_ref(), retention_days) {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "retention sweep finished"),
                    Err(e) => error!(error = %e, "retention sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocumentRecord, Provenance};
    use crate::store::SqliteDocStore;

    fn store_with_doc(deleted_days_ago: i64) -> (SqliteDocStore, String) {
        let store = SqliteDocStore::in_memory().unwrap();
        store.init().unwrap();

        let doc = DocumentRecord::new(
            "old.txt",
            "text/plain",
            "sweephash000000000",
            Provenance::Local {
                path: "/tmp/old.txt".to_string(),
            },
        );
        let id = doc.id.clone();
        store.put_document(&doc).unwrap();
        store
            .soft_delete_document(&id, Utc::now() - chrono::Duration::days(deleted_days_ago))
            .unwrap();
        (store, id)
    }

    #[test]
    fn test_sweep_removes_expired() {
        let (store, id) = store_with_doc(31);
        let removed = sweep_once(&store, 30).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_document(&id).unwrap().is_none());
    }

    #[test]
    fn test_sweep_keeps_recent() {
        let (store, id) = store_with_doc(5);
        let removed = sweep_once(&store, 30).unwrap();
        assert_eq!(removed, 0);
        assert!(store.get_document(&id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_loop_stops_on_shutdown() {
        let store: Arc<dyn DocStore> = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_retention_sweep(
            store,
            30,
            Duration::from_secs(3600),
            rx,
        ));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
