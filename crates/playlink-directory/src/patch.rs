//! Filters and patches over session records.
//!
//! Patches are the only way a session record changes after creation. Each
//! one is additive or idempotent, so a write retried after a partial
//! failure cannot corrupt the record, and concurrent writers (host and
//! joining players) need no distributed lock.

use playlink_protocol::{PeerId, PlayerId, SessionId, SessionRecord, SessionStatus, Visibility};

use crate::DirectoryError;

// ---------------------------------------------------------------------------
// SessionFilter
// ---------------------------------------------------------------------------

/// Selects session records. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub id: Option<SessionId>,
    pub status: Option<SessionStatus>,
    pub visibility: Option<Visibility>,
    pub game_id: Option<String>,
    pub host_id: Option<PlayerId>,
}

impl SessionFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches exactly one session.
    pub fn by_id(id: SessionId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn for_game(mut self, game_id: impl Into<String>) -> Self {
        self.game_id = Some(game_id.into());
        self
    }

    pub fn hosted_by(mut self, host_id: PlayerId) -> Self {
        self.host_id = Some(host_id);
        self
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        self.id.as_ref().is_none_or(|id| *id == record.id)
            && self.status.is_none_or(|s| s == record.status)
            && self.visibility.is_none_or(|v| v == record.visibility)
            && self.game_id.as_ref().is_none_or(|g| *g == record.game_id)
            && self.host_id.as_ref().is_none_or(|h| *h == record.host_id)
    }
}

// ---------------------------------------------------------------------------
// SessionPatch
// ---------------------------------------------------------------------------

/// A single atomic change to a session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPatch {
    /// Appends a player and hands it the next controller slot in
    /// `lastPlayerNumber`. Already present is a no-op; exceeding
    /// `maxPlayers` fails with `SessionFull`.
    AddPlayer(PlayerId),
    /// Removes a player. Absent is a no-op.
    RemovePlayer(PlayerId),
    /// Moves the status along the lifecycle.
    SetStatus(SessionStatus),
    /// Publishes (or withdraws) the host's signaling identity.
    SetSignaling { id: Option<PeerId>, ready: bool },
    /// Hands the room to a new host. Clears signaling until the new host
    /// publishes its own.
    SetHost {
        host_id: PlayerId,
        display_name: String,
    },
}

impl SessionPatch {
    /// Applies the patch in place. Returns `Ok(true)` if the record
    /// changed.
    ///
    /// Directory implementations call this inside whatever atomic section
    /// their backend offers (a transaction, a lock).
    ///
    /// # Errors
    /// `SessionFull` or `InvalidTransition`; the record is untouched on
    /// error.
    pub fn apply(&self, record: &mut SessionRecord) -> Result<bool, DirectoryError> {
        match self {
            Self::AddPlayer(player) => {
                if record.has_player(player) {
                    return Ok(false);
                }
                if record.is_full() {
                    return Err(DirectoryError::SessionFull(record.id.clone()));
                }
                record.players.push(player.clone());
                record.last_player_number += 1;
                Ok(true)
            }
            Self::RemovePlayer(player) => {
                let before = record.players.len();
                record.players.retain(|p| p != player);
                Ok(record.players.len() != before)
            }
            Self::SetStatus(status) => {
                if !record.status.can_transition_to(*status) {
                    return Err(DirectoryError::InvalidTransition {
                        from: record.status,
                        to: *status,
                    });
                }
                let changed = record.status != *status;
                record.status = *status;
                Ok(changed)
            }
            Self::SetSignaling { id, ready } => {
                let changed = record.signaling_id != *id || record.signaling_ready != *ready;
                record.signaling_id = id.clone();
                record.signaling_ready = *ready;
                Ok(changed)
            }
            Self::SetHost {
                host_id,
                display_name,
            } => {
                if record.host_id == *host_id {
                    return Ok(false);
                }
                record.host_id = host_id.clone();
                record.host_display_name = display_name.clone();
                record.signaling_id = None;
                record.signaling_ready = false;
                Ok(true)
            }
        }
    }
}
