use playlink_protocol::{PeerId, ProtocolError};

/// Errors raised by relay clients and media legs.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A signaling server in the failover list is unreachable or refused
    /// us. The caller should move on to the next server.
    #[error("signaling server {server} failed: {reason}")]
    Server { server: String, reason: String },

    /// Another client already holds the identity we asked for.
    #[error("identity {0} is already registered")]
    IdTaken(PeerId),

    /// The server did not acknowledge within the open timeout.
    #[error("signaling server {0} did not answer in time")]
    Timeout(String),

    /// No link to this peer exists on the connection.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// A single peer link failed. Never fatal for the session.
    #[error("link to peer {peer} failed: {reason}")]
    Peer { peer: PeerId, reason: String },

    /// The signaling connection itself is gone.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Returns `true` for failures that mean "this server is no good right
    /// now": the failover state machine advances on these.
    pub fn is_server_failure(&self) -> bool {
        matches!(
            self,
            Self::Server { .. }
                | Self::IdTaken(_)
                | Self::Timeout(_)
                | Self::ConnectionClosed(_)
        )
    }
}
