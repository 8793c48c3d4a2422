//! Session directory documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PeerId, PlayerId, SessionId, SessionStatus, Visibility};

/// A room as stored in the session directory.
///
/// The directory is the shared source of truth; the host's client owns
/// the record while it is waiting or playing. Field names are camelCase on
/// the wire.
///
/// Invariant: `players.len() <= max_players`. The directory enforces it on
/// every `AddPlayer` patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub host_id: PlayerId,
    pub host_display_name: String,
    pub game_id: String,
    pub game_title: String,
    pub platform: String,
    #[serde(default)]
    pub visibility: Visibility,
    pub max_players: usize,
    /// Join order is insertion order.
    #[serde(default)]
    pub players: Vec<PlayerId>,
    #[serde(default)]
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub signaling_id: Option<PeerId>,
    #[serde(default)]
    pub signaling_ready: bool,
    /// Highest controller slot handed out so far. Bumped by every
    /// accepted `AddPlayer` patch, never lowered, so slots stay unique
    /// even when players leave and concurrent joins race.
    #[serde(default)]
    pub last_player_number: u32,
}

impl SessionRecord {
    /// Returns `true` when no more players fit.
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    /// Returns `true` if the session is waiting and has a free slot.
    pub fn is_joinable(&self) -> bool {
        self.status.is_joinable() && !self.is_full()
    }

    /// Returns `true` if `player` is in the membership list.
    pub fn has_player(&self, player: &PlayerId) -> bool {
        self.players.iter().any(|p| p == player)
    }

    /// Time since creation, clamped at zero for records whose clock ran
    /// ahead of ours.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    /// Returns `true` if peers can connect: the host published a signaling
    /// id and flagged it ready.
    pub fn is_signaling_ready(&self) -> bool {
        self.signaling_ready && self.signaling_id.is_some()
    }
}

/// A player's entry in a session's `players` subcollection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub username: String,
    /// Controller slot, unique within the session and assigned in join
    /// order starting at 1.
    pub player_number: u32,
    #[serde(default)]
    pub ready: bool,
}
