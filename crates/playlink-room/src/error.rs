//! Error types for the reaper.

use playlink_directory::DirectoryError;
use playlink_protocol::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum ReaperError {
    /// The reaper has stopped, or its command channel is full.
    #[error("reaper for session {0} is unavailable")]
    Unavailable(SessionId),

    /// Watching the session failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
