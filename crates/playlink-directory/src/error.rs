//! Error types for the directory layer.

use playlink_protocol::{SessionId, SessionStatus};

/// Errors returned by directory operations and membership rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The backend hiccuped. Retrying the same call later is safe.
    #[error("directory temporarily unavailable: {0}")]
    Transient(String),

    /// The backend reported internal inconsistency. It heals on its own;
    /// callers should degrade rather than fail.
    #[error("directory state is corrupt: {0}")]
    CorruptState(String),

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session {0} already exists")]
    AlreadyExists(SessionId),

    /// Adding a player would exceed `maxPlayers`.
    #[error("session {0} is full")]
    SessionFull(SessionId),

    #[error("session {id} is {status} and not accepting players")]
    NotJoinable { id: SessionId, status: SessionStatus },

    #[error("cannot move session from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// The caller may not perform this mutation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid session record: {0}")]
    InvalidRecord(String),
}

impl DirectoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_corrupt_state(&self) -> bool {
        matches!(self, Self::CorruptState(_))
    }
}

/// Status codes reported by the backing document store.
///
/// Adapters translate their backend's failure into one of these and call
/// [`classify`](Self::classify); that single table decides what counts as
/// transient versus corrupt. Message text is never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCode {
    Unavailable,
    DeadlineExceeded,
    Aborted,
    ResourceExhausted,
    Cancelled,
    Internal,
    DataLoss,
    PermissionDenied,
    Unauthenticated,
    InvalidArgument,
    FailedPrecondition,
    Unknown,
}

impl BackendCode {
    /// Maps a backend failure to a [`DirectoryError`].
    pub fn classify(self, message: impl Into<String>) -> DirectoryError {
        let message = message.into();
        match self {
            Self::Internal | Self::DataLoss => DirectoryError::CorruptState(message),
            Self::Unavailable
            | Self::DeadlineExceeded
            | Self::Aborted
            | Self::ResourceExhausted
            | Self::Cancelled
            | Self::Unknown => DirectoryError::Transient(message),
            Self::PermissionDenied | Self::Unauthenticated => DirectoryError::Forbidden(message),
            Self::InvalidArgument | Self::FailedPrecondition => {
                DirectoryError::InvalidRecord(message)
            }
        }
    }
}
