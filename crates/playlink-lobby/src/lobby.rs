//! The lobby: joinable-session listing with degraded mode.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use playlink_directory::{DirectoryError, SessionDirectory, SessionFilter};
use playlink_protocol::{SessionRecord, SessionStatus, Visibility};
use playlink_retry::{RetryError, retry, with_timeout};
use playlink_room::{partition_orphans, spawn_orphan_sweep};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{LobbyConfig, LobbyError};

/// Whether the directory is currently answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LobbyMode {
    #[default]
    Normal,
    /// Listings come back empty while a background task waits for the
    /// directory to recover.
    Degraded,
}

/// The result of [`Lobby::list_joinable`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyListing {
    pub sessions: Vec<SessionRecord>,
    /// `true` when the directory could not be read and `sessions` is
    /// empty because of it, not because there are no rooms.
    pub degraded: bool,
}

impl LobbyListing {
    fn degraded() -> Self {
        Self {
            sessions: Vec::new(),
            degraded: true,
        }
    }
}

/// Lists joinable sessions without ever failing on backend hiccups.
///
/// At most one recovery task runs at a time. Dropping the lobby stops it.
pub struct Lobby<D: SessionDirectory> {
    directory: Arc<D>,
    config: LobbyConfig,
    mode: Arc<watch::Sender<LobbyMode>>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl<D: SessionDirectory> Lobby<D> {
    pub fn new(directory: Arc<D>, config: LobbyConfig) -> Self {
        let (mode, _) = watch::channel(LobbyMode::Normal);
        Self {
            directory,
            config: config.validated(),
            mode: Arc::new(mode),
            recovery: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    pub fn mode(&self) -> LobbyMode {
        *self.mode.borrow()
    }

    /// Follows mode changes, e.g. to show a "reconnecting" banner.
    pub fn watch_mode(&self) -> watch::Receiver<LobbyMode> {
        self.mode.subscribe()
    }

    /// Lists the rooms a player could join right now.
    ///
    /// A room is joinable when it is waiting, public (unless `filter`
    /// asks for private rooms), not full, and not orphaned. Orphans found
    /// along the way are deleted on a background task.
    ///
    /// # Errors
    /// Only for failures that retrying cannot fix, such as `Forbidden`.
    /// Transient and corrupt-state failures produce a degraded listing.
    pub async fn list_joinable(&self, filter: &SessionFilter) -> Result<LobbyListing, LobbyError> {
        let query = joinable_query(filter);

        let this = self;
        let query_ref = &query;
        let result = retry(
            &self.config.retry,
            "lobby query",
            move |_| this.query_once(query_ref),
            DirectoryError::is_transient,
        )
        .await;

        let records = match result {
            Ok(records) => records,
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::warn!(attempts, error = %last, "directory unreachable, degrading lobby");
                self.degrade(query);
                return Ok(LobbyListing::degraded());
            }
            Err(RetryError::Aborted { error, .. }) if error.is_corrupt_state() => {
                tracing::warn!(error = %error, "directory state corrupt, degrading lobby");
                self.degrade(query);
                return Ok(LobbyListing::degraded());
            }
            Err(RetryError::Aborted { error, .. }) => return Err(error.into()),
        };

        self.restore();

        let (kept, orphans) = partition_orphans(records, Utc::now(), self.config.orphan_timeout);
        if !orphans.is_empty() {
            tracing::debug!(count = orphans.len(), "sweeping orphaned sessions");
            spawn_orphan_sweep(Arc::clone(&self.directory), orphans);
        }

        let sessions: Vec<SessionRecord> = kept
            .into_iter()
            .filter(SessionRecord::is_joinable)
            .collect();
        tracing::debug!(count = sessions.len(), "listed joinable sessions");
        Ok(LobbyListing {
            sessions,
            degraded: false,
        })
    }

    async fn query_once(
        &self,
        query: &SessionFilter,
    ) -> Result<Vec<SessionRecord>, DirectoryError> {
        with_timeout(self.config.query_timeout, self.directory.query(query))
            .await
            .map_err(|elapsed| DirectoryError::Transient(format!("session query {elapsed}")))?
    }

    fn recovery(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.recovery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enters degraded mode and makes sure a recovery task is running.
    fn degrade(&self, query: SessionFilter) {
        self.mode.send_if_modified(|mode| {
            let changed = *mode != LobbyMode::Degraded;
            *mode = LobbyMode::Degraded;
            changed
        });

        let mut recovery = self.recovery();
        if recovery.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *recovery = Some(tokio::spawn(recover(
            Arc::clone(&self.directory),
            query,
            self.config,
            Arc::clone(&self.mode),
        )));
    }

    /// Leaves degraded mode after a successful foreground query.
    fn restore(&self) {
        if let Some(task) = self.recovery().take() {
            task.abort();
        }
        let changed = self.mode.send_if_modified(|mode| {
            let changed = *mode != LobbyMode::Normal;
            *mode = LobbyMode::Normal;
            changed
        });
        if changed {
            tracing::info!("directory answered, lobby back to normal");
        }
    }
}

impl<D: SessionDirectory> Drop for Lobby<D> {
    fn drop(&mut self) {
        if let Some(task) = self.recovery().take() {
            task.abort();
        }
    }
}

/// The directory query behind a lobby listing: waiting rooms, public
/// unless the caller asked otherwise.
fn joinable_query(filter: &SessionFilter) -> SessionFilter {
    let mut query = filter.clone().with_status(SessionStatus::Waiting);
    if query.visibility.is_none() {
        query.visibility = Some(Visibility::Public);
    }
    query
}

/// Probes the directory every cool-down until a query succeeds, then
/// flips the lobby back to normal.
async fn recover<D: SessionDirectory>(
    directory: Arc<D>,
    query: SessionFilter,
    config: LobbyConfig,
    mode: Arc<watch::Sender<LobbyMode>>,
) {
    let mut attempts: u32 = 0;
    loop {
        tokio::time::sleep(config.degraded_cooldown).await;
        attempts += 1;
        match with_timeout(config.query_timeout, directory.query(&query)).await {
            Ok(Ok(_)) => {
                mode.send_replace(LobbyMode::Normal);
                tracing::info!(attempts, "directory recovered, lobby back to normal");
                return;
            }
            Ok(Err(error)) => {
                tracing::warn!(attempts, %error, "background directory probe failed");
            }
            Err(elapsed) => {
                tracing::warn!(attempts, %elapsed, "background directory probe timed out");
            }
        }
    }
}
