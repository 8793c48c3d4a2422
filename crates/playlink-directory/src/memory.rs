//! An in-memory session directory.
//!
//! Behaves like the real document store as far as callers can tell:
//! atomic patches, idempotent deletes, live subscriptions. On top of that
//! it lets tests script failures and count calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use playlink_protocol::{PlayerId, PlayerRecord, SessionId, SessionRecord};
use tokio::sync::mpsc;

use crate::{DirectoryError, SessionDirectory, SessionFilter, SessionPatch, Snapshot, Subscription};

/// Directory operations, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryOp {
    Create,
    Get,
    Update,
    Delete,
    Query,
    Subscribe,
    PutPlayer,
    RemovePlayer,
    Players,
}

/// Cheap to clone; clones share the same store.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    store: Arc<Mutex<Store>>,
}

#[derive(Default)]
struct Store {
    sessions: BTreeMap<SessionId, SessionRecord>,
    players: HashMap<SessionId, BTreeMap<PlayerId, PlayerRecord>>,
    subscribers: Vec<Subscriber>,
    faults: HashMap<DirectoryOp, VecDeque<DirectoryError>>,
    calls: HashMap<DirectoryOp, usize>,
    deletions: HashMap<SessionId, usize>,
    latency: Duration,
}

struct Subscriber {
    filter: SessionFilter,
    tx: mpsc::UnboundedSender<Snapshot>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Test controls
    // -----------------------------------------------------------------------

    /// Stores a record directly, bypassing counters and faults. Useful for
    /// seeding old or oddly shaped rooms.
    pub fn seed(&self, record: SessionRecord) {
        let mut store = self.store();
        store.sessions.insert(record.id.clone(), record);
    }

    /// The next call to `op` fails with `error`.
    pub fn fail_next(&self, op: DirectoryOp, error: DirectoryError) {
        self.fail_times(op, error, 1);
    }

    /// The next `times` calls to `op` fail with `error`.
    pub fn fail_times(&self, op: DirectoryOp, error: DirectoryError, times: usize) {
        let mut store = self.store();
        let queue = store.faults.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Adds a delay to every operation, for timeout tests.
    pub fn set_latency(&self, latency: Duration) {
        self.store().latency = latency;
    }

    /// How many times `op` has been called, failures included.
    pub fn calls(&self, op: DirectoryOp) -> usize {
        self.store().calls.get(&op).copied().unwrap_or(0)
    }

    /// How many deletes actually removed `id`.
    pub fn deletions(&self, id: &SessionId) -> usize {
        self.store().deletions.get(id).copied().unwrap_or(0)
    }

    /// Synchronous peek at a record.
    pub fn peek(&self, id: &SessionId) -> Option<SessionRecord> {
        self.store().sessions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.store().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Counts the call, waits out any latency, and pops a scripted fault.
    async fn enter(&self, op: DirectoryOp) -> Result<(), DirectoryError> {
        let latency = {
            let mut store = self.store();
            *store.calls.entry(op).or_default() += 1;
            store.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let fault = self
            .store()
            .faults
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Store {
    /// Pushes fresh snapshots to every subscriber the change is relevant
    /// to, and forgets subscribers that went away.
    fn publish(&mut self, before: Option<&SessionRecord>, after: Option<&SessionRecord>) {
        let Store {
            sessions,
            subscribers,
            ..
        } = self;
        subscribers.retain(|sub| {
            let relevant = before.is_some_and(|r| sub.filter.matches(r))
                || after.is_some_and(|r| sub.filter.matches(r));
            if !relevant {
                return !sub.tx.is_closed();
            }
            let snapshot: Snapshot = sessions
                .values()
                .filter(|r| sub.filter.matches(r))
                .cloned()
                .collect();
            sub.tx.send(snapshot).is_ok()
        });
    }
}

impl SessionDirectory for InMemoryDirectory {
    async fn create(&self, record: SessionRecord) -> Result<SessionId, DirectoryError> {
        self.enter(DirectoryOp::Create).await?;
        if record.max_players == 0 {
            return Err(DirectoryError::InvalidRecord("maxPlayers must be at least 1".into()));
        }
        if record.players.len() > record.max_players {
            return Err(DirectoryError::InvalidRecord(format!(
                "{} players exceed maxPlayers {}",
                record.players.len(),
                record.max_players
            )));
        }

        let mut store = self.store();
        if store.sessions.contains_key(&record.id) {
            return Err(DirectoryError::AlreadyExists(record.id));
        }
        let id = record.id.clone();
        store.sessions.insert(id.clone(), record.clone());
        store.publish(None, Some(&record));
        Ok(id)
    }

    async fn get(&self, id: &SessionId) -> Result<SessionRecord, DirectoryError> {
        self.enter(DirectoryOp::Get).await?;
        self.store()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))
    }

    async fn update(
        &self,
        id: &SessionId,
        patch: SessionPatch,
    ) -> Result<SessionRecord, DirectoryError> {
        self.enter(DirectoryOp::Update).await?;
        let mut store = self.store();
        let record = store
            .sessions
            .get(id)
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))?;

        let before = record.clone();
        let mut after = record.clone();
        if !patch.apply(&mut after)? {
            return Ok(after);
        }
        store.sessions.insert(id.clone(), after.clone());
        store.publish(Some(&before), Some(&after));
        Ok(after)
    }

    async fn delete(&self, id: &SessionId) -> Result<(), DirectoryError> {
        self.enter(DirectoryOp::Delete).await?;
        let mut store = self.store();
        store.players.remove(id);
        if let Some(removed) = store.sessions.remove(id) {
            *store.deletions.entry(id.clone()).or_default() += 1;
            store.publish(Some(&removed), None);
        }
        Ok(())
    }

    async fn query(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>, DirectoryError> {
        self.enter(DirectoryOp::Query).await?;
        Ok(self
            .store()
            .sessions
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn subscribe(&self, filter: SessionFilter) -> Result<Subscription, DirectoryError> {
        self.enter(DirectoryOp::Subscribe).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut store = self.store();
        let initial: Snapshot = store
            .sessions
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        let _ = tx.send(initial);
        store.subscribers.push(Subscriber { filter, tx });
        Ok(Subscription::new(rx))
    }

    async fn put_player(
        &self,
        session: &SessionId,
        player: PlayerRecord,
    ) -> Result<(), DirectoryError> {
        self.enter(DirectoryOp::PutPlayer).await?;
        let mut store = self.store();
        if !store.sessions.contains_key(session) {
            return Err(DirectoryError::NotFound(session.clone()));
        }
        store
            .players
            .entry(session.clone())
            .or_default()
            .insert(player.id.clone(), player);
        Ok(())
    }

    async fn remove_player(
        &self,
        session: &SessionId,
        player: &PlayerId,
    ) -> Result<(), DirectoryError> {
        self.enter(DirectoryOp::RemovePlayer).await?;
        if let Some(players) = self.store().players.get_mut(session) {
            players.remove(player);
        }
        Ok(())
    }

    async fn players(&self, session: &SessionId) -> Result<Vec<PlayerRecord>, DirectoryError> {
        self.enter(DirectoryOp::Players).await?;
        let store = self.store();
        if !store.sessions.contains_key(session) {
            return Err(DirectoryError::NotFound(session.clone()));
        }
        let mut players: Vec<PlayerRecord> = store
            .players
            .get(session)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default();
        players.sort_by_key(|p| p.player_number);
        Ok(players)
    }
}
