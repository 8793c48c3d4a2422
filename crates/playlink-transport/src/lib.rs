//! Signaling relay clients and media legs for Playlink.
//!
//! A host registers an identity with a signaling relay, then accepts
//! peer links through it. Over each link it sends data (JSON payloads)
//! and media (a [`MediaStream`] forwarded by a [`CallHandle`]); peers
//! send input back.
//!
//! The [`SignalingRelay`] and [`SignalingConnection`] traits are the seam.
//! Two implementations ship:
//!
//! - [`WebSocketRelay`] (feature `websocket`) speaks
//!   [`RelayFrame`](playlink_protocol::RelayFrame)s to a relay server.
//! - [`MemoryRelay`] is an in-process hub for tests and local play. It
//!   can inject server failures and simulate remote peers.

mod error;
mod media;
mod memory;
mod server;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use media::{CallHandle, MediaStream, MediaSubscription};
pub use memory::{MemoryRelay, PeerDelivery, RemotePeer};
pub use server::SignalingServer;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketLink, WebSocketRelay};

use std::future::Future;

use playlink_protocol::PeerId;
use tokio::sync::mpsc;

/// Something that happened on a signaling connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A remote peer opened a data link to us.
    IncomingConnection(PeerId),
    /// A payload arrived on a peer's data channel. Per-peer order is
    /// preserved.
    Data {
        peer: PeerId,
        payload: serde_json::Value,
    },
    /// A peer's data link closed.
    PeerClosed(PeerId),
    /// A single peer link failed.
    PeerError { peer: PeerId, reason: String },
    /// The server invalidated our identity.
    IdentityExpired,
    /// The socket to the signaling server dropped. The identity may still
    /// be recoverable with [`SignalingConnection::reconnect`].
    Disconnected,
    /// The server reported an error after registration.
    ServerError(String),
}

/// A freshly registered signaling connection.
pub struct OpenedRelay<C> {
    pub connection: C,
    /// The identity the server actually assigned.
    pub assigned_id: PeerId,
    /// Every event for this connection, in arrival order. Stays open across
    /// successful reconnects.
    pub events: mpsc::UnboundedReceiver<RelayEvent>,
}

/// Opens signaling connections.
pub trait SignalingRelay: Send + Sync + 'static {
    type Connection: SignalingConnection;

    /// Registers `local_id` on `server`.
    ///
    /// # Errors
    /// Returns an error for which [`TransportError::is_server_failure`]
    /// holds when the server is unreachable, refuses the id, or does not
    /// answer in time.
    fn open(
        &self,
        local_id: &PeerId,
        server: &SignalingServer,
    ) -> impl Future<Output = Result<OpenedRelay<Self::Connection>, TransportError>> + Send;
}

/// A live, registered signaling connection.
///
/// All methods except [`reconnect`](Self::reconnect) are non-blocking.
pub trait SignalingConnection: Clone + Send + Sync + 'static {
    /// Sends a JSON payload to one peer's data channel.
    fn send(&self, peer: &PeerId, payload: serde_json::Value) -> Result<(), TransportError>;

    /// Starts forwarding `stream` to `peer`.
    fn call(&self, peer: &PeerId, stream: &MediaStream) -> Result<CallHandle, TransportError>;

    /// Closes our data link to `peer`. No-op if there is none.
    fn disconnect_peer(&self, peer: &PeerId);

    /// Tries to re-register the current identity in place.
    fn reconnect(&self) -> impl Future<Output = Result<PeerId, TransportError>> + Send;

    /// Releases the identity and closes the connection. Idempotent.
    fn close(&self);
}
