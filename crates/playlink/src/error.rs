//! Unified error type for the Playlink facade.

use playlink_directory::DirectoryError;
use playlink_lobby::LobbyError;
use playlink_peer::{FanoutError, PeerError};
use playlink_protocol::ProtocolError;
use playlink_room::ReaperError;
use playlink_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// Through the `playlink` crate you handle this one type instead of
/// importing errors from each sub-crate; `?` converts automatically.
#[derive(Debug, thiserror::Error)]
pub enum PlaylinkError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session directory refused or failed an operation.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Reaper(#[from] ReaperError),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// Signaling or a peer link failed.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// The outbound stream could not start.
    #[error(transparent)]
    Fanout(#[from] FanoutError),

    /// A configuration document did not parse.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PlaylinkError {
    /// Returns `true` if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Directory(e) => e.is_transient(),
            Self::Lobby(LobbyError::Directory(e)) => e.is_transient(),
            Self::Reaper(ReaperError::Directory(e)) => e.is_transient(),
            Self::Transport(e) => e.is_server_failure(),
            Self::Fanout(FanoutError::CaptureNotReady { .. }) => true,
            _ => false,
        }
    }
}
