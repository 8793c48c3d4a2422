//! The session directory boundary.

use std::future::Future;

use playlink_protocol::{PlayerId, PlayerRecord, SessionId, SessionRecord};
use tokio::sync::mpsc;

use crate::{DirectoryError, SessionFilter, SessionPatch};

/// Every record matching a subscription's filter, as of one change.
pub type Snapshot = Vec<SessionRecord>;

/// A typed wrapper over a remote, replicated document store.
///
/// Sessions are keyed by id; each has a `players` subcollection keyed by
/// player id. There is no business logic here: membership rules live in
/// [`SessionService`](crate::SessionService), so every other component can
/// be tested against a fake.
///
/// Any operation may fail with [`DirectoryError::Transient`] or
/// [`DirectoryError::CorruptState`].
pub trait SessionDirectory: Send + Sync + 'static {
    /// Stores a new record under `record.id`.
    ///
    /// # Errors
    /// `AlreadyExists` if the id is taken.
    fn create(
        &self,
        record: SessionRecord,
    ) -> impl Future<Output = Result<SessionId, DirectoryError>> + Send;

    /// # Errors
    /// `NotFound` if no such session exists.
    fn get(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<SessionRecord, DirectoryError>> + Send;

    /// Applies `patch` atomically and returns the updated record.
    fn update(
        &self,
        id: &SessionId,
        patch: SessionPatch,
    ) -> impl Future<Output = Result<SessionRecord, DirectoryError>> + Send;

    /// Deletes a session and its players. Deleting a missing id succeeds.
    fn delete(&self, id: &SessionId) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    fn query(
        &self,
        filter: &SessionFilter,
    ) -> impl Future<Output = Result<Vec<SessionRecord>, DirectoryError>> + Send;

    /// Watches every record matching `filter`. The first snapshot arrives
    /// immediately; another follows each relevant change.
    fn subscribe(
        &self,
        filter: SessionFilter,
    ) -> impl Future<Output = Result<Subscription, DirectoryError>> + Send;

    /// Creates or replaces a player entry.
    ///
    /// # Errors
    /// `NotFound` if the session does not exist.
    fn put_player(
        &self,
        session: &SessionId,
        player: PlayerRecord,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// Deletes a player entry. Missing entries are a no-op.
    fn remove_player(
        &self,
        session: &SessionId,
        player: &PlayerId,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// All player entries, ordered by `player_number`.
    fn players(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<Vec<PlayerRecord>, DirectoryError>> + Send;
}

/// A live query. Dropping it (or calling [`cancel`](Self::cancel)) stops
/// delivery.
pub struct Subscription {
    snapshots: mpsc::UnboundedReceiver<Snapshot>,
}

impl Subscription {
    /// Wraps the receiving end of a snapshot feed.
    pub fn new(snapshots: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { snapshots }
    }

    /// Waits for the next snapshot. `None` once the directory stops the
    /// feed.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.snapshots.recv().await
    }

    pub fn cancel(mut self) {
        self.snapshots.close();
    }
}
