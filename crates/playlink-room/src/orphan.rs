//! Orphan sweep: deleting long-empty rooms as a side effect of listing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use playlink_directory::SessionDirectory;
use playlink_protocol::{SessionId, SessionRecord};
use tokio::task::JoinHandle;

/// A room is orphaned when nobody is in it and it is older than `timeout`.
pub fn is_orphaned(record: &SessionRecord, now: DateTime<Utc>, timeout: Duration) -> bool {
    record.players.is_empty() && record.age(now) > timeout
}

/// Splits `records` into the ones to keep and the ids of orphans.
pub fn partition_orphans(
    records: Vec<SessionRecord>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> (Vec<SessionRecord>, Vec<SessionId>) {
    let (orphans, kept): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|r| is_orphaned(r, now, timeout));
    (kept, orphans.into_iter().map(|r| r.id).collect())
}

/// Deletes `ids` on a background task. Failures are logged and skipped;
/// the next listing will try again.
///
/// The task resolves to the number of successful deletes.
pub fn spawn_orphan_sweep<D: SessionDirectory>(
    directory: Arc<D>,
    ids: Vec<SessionId>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut deleted = 0;
        for session_id in ids {
            match directory.delete(&session_id).await {
                Ok(()) => {
                    tracing::info!(%session_id, "orphaned session deleted");
                    deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(%session_id, error = %e, "orphan delete failed");
                }
            }
        }
        deleted
    })
}
