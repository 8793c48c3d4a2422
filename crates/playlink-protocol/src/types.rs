//! Identifiers and small enums shared by every Playlink crate.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Declares a string newtype identifier.
///
/// Each id serializes as a bare JSON string (`#[serde(transparent)]`) and
/// prints without decoration, so it can be dropped straight into tracing
/// fields with `%`.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Key of a session document in the directory. Usually a six
    /// character room code (see [`crate::code`]).
    SessionId
}

string_id! {
    /// A user taking part in a session: the host or a joining player.
    PlayerId
}

string_id! {
    /// An identity registered with a signaling relay. The host's peer id
    /// is what gets published as `signalingId` on the session record.
    PeerId
}

impl PeerId {
    /// Builds the host's signaling id: `host-{session}-{user}-{millis}`.
    ///
    /// The timestamp suffix keeps a restarted host from colliding with its
    /// own stale registration on the relay.
    pub fn for_host(session_id: &SessionId, user: &PlayerId, unix_millis: i64) -> Self {
        Self(format!("host-{session_id}-{user}-{unix_millis}"))
    }
}

// ---------------------------------------------------------------------------
// Visibility
// ---------------------------------------------------------------------------

/// Whether a session shows up in the public lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a session record.
///
/// ```text
///   Waiting ──→ Playing ──→ Finished
///      │           │           │
///      └───────────┴───────────┴──→ Closed
/// ```
///
/// `Waiting → Finished` is allowed too (host gives up before starting).
/// `Closed` is terminal; the record is deleted shortly after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Waiting,
    Playing,
    Finished,
    Closed,
}

impl SessionStatus {
    /// Only waiting sessions accept new players.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Returns `true` once the session can no longer change status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns `true` if a host may move the session from `self` to
    /// `target`. Re-applying the current status is accepted so a retried
    /// write stays idempotent.
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;
        if *self == target {
            return true;
        }
        matches!(
            (self, target),
            (Waiting, Playing)
                | (Waiting, Finished)
                | (Playing, Finished)
                | (Waiting | Playing | Finished, Closed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Waiting => "waiting",
            Self::Playing => "playing",
            Self::Finished => "finished",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}
