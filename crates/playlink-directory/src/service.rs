//! Membership rules on top of a [`SessionDirectory`].

use std::sync::Arc;

use chrono::Utc;
use playlink_protocol::code::generate_session_code;
use playlink_protocol::{
    PeerId, PlayerId, PlayerRecord, SessionId, SessionRecord, SessionStatus, Visibility,
};

use crate::{DirectoryError, SessionDirectory, SessionPatch};

/// Attempts at finding an unused room code before giving up.
const CODE_ATTEMPTS: usize = 5;

/// Everything a host picks when creating a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub host_id: PlayerId,
    pub host_display_name: String,
    pub game_id: String,
    pub game_title: String,
    pub platform: String,
    pub visibility: Visibility,
    pub max_players: usize,
}

/// Applies Playlink's membership rules to a directory.
///
/// - Only the host changes status, publishes signaling, or closes.
/// - Players join only while the room is waiting and has space.
/// - Joining and leaving are idempotent.
pub struct SessionService<D> {
    directory: Arc<D>,
}

impl<D> Clone for SessionService<D> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
        }
    }
}

impl<D: SessionDirectory> SessionService<D> {
    /// Upper bound on `max_players` for a new room.
    pub const MAX_PLAYERS: usize = 8;

    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    /// Creates a waiting room under a fresh code. The host is not a
    /// player; `players` starts empty.
    ///
    /// # Errors
    /// `InvalidRecord` for an out-of-range `max_players` or when no free
    /// code turned up; otherwise whatever the directory reports.
    pub async fn create_session(&self, new: NewSession) -> Result<SessionRecord, DirectoryError> {
        if new.max_players == 0 || new.max_players > Self::MAX_PLAYERS {
            return Err(DirectoryError::InvalidRecord(format!(
                "maxPlayers must be between 1 and {}, got {}",
                Self::MAX_PLAYERS,
                new.max_players
            )));
        }

        for _ in 0..CODE_ATTEMPTS {
            let record = SessionRecord {
                id: generate_session_code(),
                host_id: new.host_id.clone(),
                host_display_name: new.host_display_name.clone(),
                game_id: new.game_id.clone(),
                game_title: new.game_title.clone(),
                platform: new.platform.clone(),
                visibility: new.visibility,
                max_players: new.max_players,
                players: Vec::new(),
                status: SessionStatus::Waiting,
                created_at: Utc::now(),
                signaling_id: None,
                signaling_ready: false,
                last_player_number: 0,
            };
            match self.directory.create(record.clone()).await {
                Ok(session_id) => {
                    tracing::info!(
                        %session_id,
                        host_id = %record.host_id,
                        max_players = record.max_players,
                        "session created"
                    );
                    return Ok(record);
                }
                Err(DirectoryError::AlreadyExists(taken)) => {
                    tracing::debug!(%taken, "room code collision, drawing another");
                }
                Err(e) => return Err(e),
            }
        }
        Err(DirectoryError::InvalidRecord(
            "could not allocate a free room code".into(),
        ))
    }

    /// Adds a player and assigns the next controller slot.
    ///
    /// Joining a room you are already in returns your existing entry.
    ///
    /// # Errors
    /// `NotJoinable` unless the room is waiting, `SessionFull` when
    /// there is no space, `NotFound` for an unknown room.
    pub async fn join(
        &self,
        session_id: &SessionId,
        player_id: &PlayerId,
        username: &str,
    ) -> Result<PlayerRecord, DirectoryError> {
        let record = self.directory.get(session_id).await?;

        if record.has_player(player_id) {
            let existing = self.directory.players(session_id).await?;
            if let Some(entry) = existing.into_iter().find(|p| p.id == *player_id) {
                return Ok(entry);
            }
        } else if !record.status.is_joinable() {
            return Err(DirectoryError::NotJoinable {
                id: session_id.clone(),
                status: record.status,
            });
        }

        // The slot comes from the atomic patch, not from the read above,
        // so racing joins cannot share one.
        let updated = self
            .directory
            .update(session_id, SessionPatch::AddPlayer(player_id.clone()))
            .await?;
        let player_number = updated.last_player_number;

        let entry = PlayerRecord {
            id: player_id.clone(),
            username: username.to_owned(),
            player_number,
            ready: false,
        };
        self.directory.put_player(session_id, entry.clone()).await?;

        tracing::info!(
            %session_id,
            %player_id,
            player_number,
            players = updated.players.len(),
            "player joined"
        );
        Ok(entry)
    }

    /// Removes a player. Leaving a room you are not in, or one that no
    /// longer exists, succeeds.
    pub async fn leave(
        &self,
        session_id: &SessionId,
        player_id: &PlayerId,
    ) -> Result<(), DirectoryError> {
        match self
            .directory
            .update(session_id, SessionPatch::RemovePlayer(player_id.clone()))
            .await
        {
            Ok(updated) => {
                tracing::info!(
                    %session_id,
                    %player_id,
                    players = updated.players.len(),
                    "player left"
                );
            }
            Err(DirectoryError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        self.directory.remove_player(session_id, player_id).await
    }

    /// Moves the room along its lifecycle.
    ///
    /// # Errors
    /// `Forbidden` unless `caller` is the host; `InvalidTransition` for a
    /// backwards move.
    pub async fn set_status(
        &self,
        session_id: &SessionId,
        caller: &PlayerId,
        status: SessionStatus,
    ) -> Result<SessionRecord, DirectoryError> {
        self.require_host(session_id, caller).await?;
        let updated = self
            .directory
            .update(session_id, SessionPatch::SetStatus(status))
            .await?;
        tracing::info!(%session_id, %status, "session status changed");
        Ok(updated)
    }

    /// Publishes the host's signaling identity so peers can connect.
    /// `None` withdraws it.
    pub async fn publish_signaling(
        &self,
        session_id: &SessionId,
        caller: &PlayerId,
        signaling_id: Option<PeerId>,
    ) -> Result<SessionRecord, DirectoryError> {
        self.require_host(session_id, caller).await?;
        let ready = signaling_id.is_some();
        self.directory
            .update(
                session_id,
                SessionPatch::SetSignaling {
                    id: signaling_id,
                    ready,
                },
            )
            .await
    }

    /// Marks the room closed so watchers notice, then deletes it.
    /// Closing a room that is already gone succeeds.
    pub async fn close(
        &self,
        session_id: &SessionId,
        caller: &PlayerId,
    ) -> Result<(), DirectoryError> {
        match self.require_host(session_id, caller).await {
            Ok(_) => {}
            Err(DirectoryError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        if let Err(e) = self
            .directory
            .update(session_id, SessionPatch::SetStatus(SessionStatus::Closed))
            .await
        {
            tracing::debug!(%session_id, error = %e, "could not mark session closed before delete");
        }
        self.directory.delete(session_id).await?;
        tracing::info!(%session_id, "session closed");
        Ok(())
    }

    /// Hands the room to the player with the lowest `playerNumber`. That
    /// player stops being a player and becomes the host. With nobody left
    /// the room is deleted and `None` is returned.
    pub async fn promote_host(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<PlayerId>, DirectoryError> {
        let players = self.directory.players(session_id).await?;
        let Some(next) = players.into_iter().min_by_key(|p| p.player_number) else {
            self.directory.delete(session_id).await?;
            tracing::info!(%session_id, "no players left to promote, session deleted");
            return Ok(None);
        };

        self.directory
            .update(
                session_id,
                SessionPatch::SetHost {
                    host_id: next.id.clone(),
                    display_name: next.username.clone(),
                },
            )
            .await?;
        self.directory
            .update(session_id, SessionPatch::RemovePlayer(next.id.clone()))
            .await?;
        self.directory.remove_player(session_id, &next.id).await?;

        tracing::info!(%session_id, new_host = %next.id, "host promoted");
        Ok(Some(next.id))
    }

    async fn require_host(
        &self,
        session_id: &SessionId,
        caller: &PlayerId,
    ) -> Result<SessionRecord, DirectoryError> {
        let record = self.directory.get(session_id).await?;
        if record.host_id != *caller {
            return Err(DirectoryError::Forbidden(format!(
                "{caller} is not the host of session {session_id}"
            )));
        }
        Ok(record)
    }
}
