//! Error types for the host peer layer.

use playlink_protocol::PeerId;
use playlink_transport::TransportError;

/// Errors from the peer connection manager.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The manager task has stopped.
    #[error("peer connection manager is unavailable")]
    Unavailable,

    /// No link to this peer.
    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),

    /// The signaling connection is not up.
    #[error("signaling is not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from a capture source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The rendering surface is not producing frames yet. Worth retrying.
    #[error("capture surface not ready: {0}")]
    NotReady(String),

    /// Capture cannot work on this surface.
    #[error("capture failed: {0}")]
    Failed(String),
}

impl CaptureError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}

/// Errors from starting a stream.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    /// The surface never became ready within the retry bound.
    #[error("capture surface still not ready after {attempts} attempts")]
    CaptureNotReady { attempts: u32 },

    #[error(transparent)]
    Capture(CaptureError),

    #[error(transparent)]
    Peer(#[from] PeerError),
}
