//! Grace-period reaper: one actor per hosted session.
//!
//! The actor subscribes to its session record and arms a timer when the
//! membership list goes from non-empty to empty. A rejoin before expiry
//! cancels the timer. On expiry the record is read again and deleted only
//! if it is still empty.

use std::sync::Arc;

use playlink_directory::{DirectoryError, SessionDirectory, SessionFilter, Snapshot, Subscription};
use playlink_protocol::SessionId;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use crate::{ReaperConfig, ReaperError, ReaperState};

/// Why a reaper stopped watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaperEvent {
    /// The room stayed empty through the grace period and was deleted.
    Closed { session_id: SessionId },
    /// The record disappeared for another reason (explicit close, orphan
    /// sweep, last will).
    Gone { session_id: SessionId },
}

/// A snapshot of reaper state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperStatus {
    pub session_id: SessionId,
    pub state: ReaperState,
    /// Players seen in the latest snapshot.
    pub players: usize,
}

pub(crate) enum ReaperCommand {
    Status {
        reply: oneshot::Sender<ReaperStatus>,
    },
    Shutdown,
}

/// Handle to a running reaper. Cheap to clone.
#[derive(Clone)]
pub struct ReaperHandle {
    session_id: SessionId,
    sender: mpsc::Sender<ReaperCommand>,
}

impl ReaperHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub async fn status(&self) -> Result<ReaperStatus, ReaperError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(ReaperCommand::Status { reply: reply_tx })
            .await
            .map_err(|_| ReaperError::Unavailable(self.session_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| ReaperError::Unavailable(self.session_id.clone()))
    }

    /// Stops the reaper without touching the record. Stopping a reaper
    /// that already finished succeeds.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(ReaperCommand::Shutdown).await;
    }

    /// Returns `true` while the actor is still running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

struct ReaperActor<D> {
    directory: Arc<D>,
    session_id: SessionId,
    config: ReaperConfig,
    state: ReaperState,
    players: usize,
    deadline: Option<Instant>,
    subscription: Subscription,
    commands: mpsc::Receiver<ReaperCommand>,
    events: mpsc::UnboundedSender<ReaperEvent>,
}

impl<D: SessionDirectory> ReaperActor<D> {
    async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, grace = ?self.config.grace, "reaper started");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(ReaperCommand::Status { reply }) => {
                        let _ = reply.send(self.status());
                    }
                    Some(ReaperCommand::Shutdown) | None => break,
                },
                snapshot = self.subscription.next() => match snapshot {
                    Some(snapshot) => self.on_snapshot(snapshot),
                    None => {
                        tracing::warn!(session_id = %self.session_id, "session feed ended");
                        break;
                    }
                },
                () = wait_until(deadline) => self.on_deadline().await,
            }

            if self.state.is_terminal() {
                break;
            }
        }

        tracing::info!(session_id = %self.session_id, state = %self.state, "reaper stopped");
    }

    fn on_snapshot(&mut self, snapshot: Snapshot) {
        let Some(record) = snapshot.into_iter().find(|r| r.id == self.session_id) else {
            self.finish_gone();
            return;
        };

        let previous = self.players;
        self.players = record.players.len();

        match (previous, self.players) {
            (0, 0) => {}
            (_, 0) => {
                if self.deadline.is_none() {
                    self.deadline = Some(Instant::now() + self.config.grace);
                    self.state = ReaperState::GracePeriod;
                    tracing::info!(
                        session_id = %self.session_id,
                        grace = ?self.config.grace,
                        "room empty, grace period started"
                    );
                }
            }
            (_, n) => {
                if self.deadline.take().is_some() {
                    tracing::info!(
                        session_id = %self.session_id,
                        players = n,
                        "player rejoined, grace period cancelled"
                    );
                }
                self.state = ReaperState::Occupied;
            }
        }
    }

    async fn on_deadline(&mut self) {
        self.deadline = None;

        let record = match self.directory.get(&self.session_id).await {
            Ok(record) => record,
            Err(DirectoryError::NotFound(_)) => {
                self.finish_gone();
                return;
            }
            Err(e) => {
                self.recheck(&e);
                return;
            }
        };

        self.players = record.players.len();
        if self.players > 0 {
            tracing::debug!(
                session_id = %self.session_id,
                players = self.players,
                "room refilled before expiry"
            );
            self.state = ReaperState::Occupied;
            return;
        }

        match self.directory.delete(&self.session_id).await {
            Ok(()) => {
                self.state = ReaperState::Closed;
                tracing::info!(
                    session_id = %self.session_id,
                    "empty room closed after grace period"
                );
                let _ = self.events.send(ReaperEvent::Closed {
                    session_id: self.session_id.clone(),
                });
            }
            Err(e) => self.recheck(&e),
        }
    }

    fn recheck(&mut self, error: &DirectoryError) {
        tracing::warn!(
            session_id = %self.session_id,
            %error,
            retry_in = ?self.config.recheck_delay,
            "grace expiry check failed"
        );
        self.deadline = Some(Instant::now() + self.config.recheck_delay);
    }

    fn finish_gone(&mut self) {
        self.deadline = None;
        self.state = ReaperState::Gone;
        tracing::info!(session_id = %self.session_id, "session record gone");
        let _ = self.events.send(ReaperEvent::Gone {
            session_id: self.session_id.clone(),
        });
    }

    fn status(&self) -> ReaperStatus {
        ReaperStatus {
            session_id: self.session_id.clone(),
            state: self.state,
            players: self.players,
        }
    }
}

/// Sleeps until `deadline`, or forever when there is none. Sits in a
/// `select!` next to the other branches.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Starts watching `session_id` and returns a handle plus the event feed.
///
/// The subscription is established before this returns, so no membership
/// change after the call is missed.
///
/// # Errors
/// Whatever the directory reports for the subscription.
pub async fn spawn_reaper<D: SessionDirectory>(
    directory: Arc<D>,
    session_id: SessionId,
    config: ReaperConfig,
) -> Result<(ReaperHandle, mpsc::UnboundedReceiver<ReaperEvent>), ReaperError> {
    let subscription = directory
        .subscribe(SessionFilter::by_id(session_id.clone()))
        .await?;
    let (tx, rx) = mpsc::channel(16);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let actor = ReaperActor {
        directory,
        session_id: session_id.clone(),
        config: config.validated(),
        state: ReaperState::Idle,
        players: 0,
        deadline: None,
        subscription,
        commands: rx,
        events: events_tx,
    };
    tokio::spawn(actor.run());

    Ok((
        ReaperHandle {
            session_id,
            sender: tx,
        },
        events_rx,
    ))
}
