//! Error types for the lobby.

use playlink_directory::DirectoryError;

/// A listing failure the lobby could not absorb.
///
/// Transient and corrupt-state failures never show up here; they degrade
/// the listing instead.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
