//! An in-process signaling relay.
//!
//! [`MemoryRelay`] plays both the relay servers and the remote peers. A
//! test (or a local couch session) can:
//!
//! - take named servers down, permanently or for `n` attempts,
//! - read back the order of open attempts,
//! - expire a host's identity or drop its socket,
//! - make in-place reconnects fail,
//! - connect simulated [`RemotePeer`]s that send input and receive data
//!   and media.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use playlink_protocol::{InputEvent, MediaFrame, PeerId};
use tokio::sync::mpsc;

use crate::{
    CallHandle, MediaStream, OpenedRelay, RelayEvent, SignalingConnection, SignalingRelay,
    SignalingServer, TransportError,
};

/// Something a simulated remote peer received from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerDelivery {
    Data(serde_json::Value),
    CallStarted { call_id: u64 },
    Media { call_id: u64, frame: MediaFrame },
    CallEnded { call_id: u64 },
    /// The host closed the data link.
    Disconnected,
}

/// Cheap to clone; clones share the same hub.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Default)]
struct Hub {
    /// Server name → remaining failures (`None` = down until restored).
    down: HashMap<String, Option<u32>>,
    attempts: Vec<String>,
    hosts: HashMap<PeerId, HostSlot>,
    reconnect_failures: u32,
    reconnect_attempts: u32,
    next_call_id: u64,
}

struct HostSlot {
    events: mpsc::UnboundedSender<RelayEvent>,
    peers: HashMap<PeerId, mpsc::UnboundedSender<PeerDelivery>>,
    expired: bool,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Server control
    // -----------------------------------------------------------------------

    /// Every open attempt against `server` fails until restored.
    pub fn fail_server(&self, server: &str) {
        self.hub().down.insert(server.to_owned(), None);
    }

    /// The next `times` open attempts against `server` fail.
    pub fn fail_server_times(&self, server: &str, times: u32) {
        self.hub().down.insert(server.to_owned(), Some(times));
    }

    pub fn restore_server(&self, server: &str) {
        self.hub().down.remove(server);
    }

    /// Server names in the order `open` was called against them.
    pub fn open_attempts(&self) -> Vec<String> {
        self.hub().attempts.clone()
    }

    /// The next `times` calls to `reconnect` fail.
    pub fn fail_reconnects(&self, times: u32) {
        self.hub().reconnect_failures = times;
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.hub().reconnect_attempts
    }

    // -----------------------------------------------------------------------
    // Host control
    // -----------------------------------------------------------------------

    pub fn is_registered(&self, host: &PeerId) -> bool {
        self.hub().hosts.contains_key(host)
    }

    /// Invalidates `host`'s identity, as a server does when a session
    /// times out.
    pub fn expire(&self, host: &PeerId) {
        let mut hub = self.hub();
        if let Some(slot) = hub.hosts.get_mut(host) {
            slot.expired = true;
            let _ = slot.events.send(RelayEvent::IdentityExpired);
        }
    }

    /// Simulates the socket to the relay dropping.
    pub fn drop_socket(&self, host: &PeerId) {
        if let Some(slot) = self.hub().hosts.get(host) {
            let _ = slot.events.send(RelayEvent::Disconnected);
        }
    }

    /// Connects a simulated remote peer to `host`.
    ///
    /// # Errors
    /// `UnknownPeer` if `host` is not registered or its identity expired.
    pub fn connect_peer(
        &self,
        host: &PeerId,
        remote: impl Into<PeerId>,
    ) -> Result<RemotePeer, TransportError> {
        let remote = remote.into();
        let mut hub = self.hub();
        let slot = hub
            .hosts
            .get_mut(host)
            .filter(|slot| !slot.expired)
            .ok_or_else(|| TransportError::UnknownPeer(host.clone()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        slot.peers.insert(remote.clone(), tx);
        slot.events
            .send(RelayEvent::IncomingConnection(remote.clone()))
            .map_err(|_| TransportError::ConnectionClosed(host.to_string()))?;

        Ok(RemotePeer {
            id: remote,
            host: host.clone(),
            relay: self.clone(),
            inbox: rx,
        })
    }

    fn emit(&self, host: &PeerId, event: RelayEvent) -> Result<(), TransportError> {
        let hub = self.hub();
        let slot = hub
            .hosts
            .get(host)
            .ok_or_else(|| TransportError::UnknownPeer(host.clone()))?;
        slot.events
            .send(event)
            .map_err(|_| TransportError::ConnectionClosed(host.to_string()))
    }
}

impl SignalingRelay for MemoryRelay {
    type Connection = MemoryLink;

    async fn open(
        &self,
        local_id: &PeerId,
        server: &SignalingServer,
    ) -> Result<OpenedRelay<MemoryLink>, TransportError> {
        let mut hub = self.hub();
        hub.attempts.push(server.name.clone());

        let failing = match hub.down.get_mut(&server.name) {
            Some(None) => true,
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if failing {
            return Err(TransportError::Server {
                server: server.name.clone(),
                reason: "network error".into(),
            });
        }

        if hub.hosts.get(local_id).is_some_and(|slot| !slot.expired) {
            return Err(TransportError::IdTaken(local_id.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        hub.hosts.insert(
            local_id.clone(),
            HostSlot {
                events: tx,
                peers: HashMap::new(),
                expired: false,
            },
        );

        Ok(OpenedRelay {
            connection: MemoryLink {
                id: local_id.clone(),
                relay: self.clone(),
            },
            assigned_id: local_id.clone(),
            events: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryLink
// ---------------------------------------------------------------------------

/// The host's side of a [`MemoryRelay`] registration.
#[derive(Clone)]
pub struct MemoryLink {
    id: PeerId,
    relay: MemoryRelay,
}

impl MemoryLink {
    fn peer_sender(
        &self,
        peer: &PeerId,
    ) -> Result<mpsc::UnboundedSender<PeerDelivery>, TransportError> {
        let hub = self.relay.hub();
        let slot = hub
            .hosts
            .get(&self.id)
            .ok_or_else(|| TransportError::ConnectionClosed(self.id.to_string()))?;
        slot.peers
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))
    }
}

impl SignalingConnection for MemoryLink {
    fn send(&self, peer: &PeerId, payload: serde_json::Value) -> Result<(), TransportError> {
        self.peer_sender(peer)?
            .send(PeerDelivery::Data(payload))
            .map_err(|_| TransportError::Peer {
                peer: peer.clone(),
                reason: "peer went away".into(),
            })
    }

    fn call(&self, peer: &PeerId, stream: &MediaStream) -> Result<CallHandle, TransportError> {
        let tx = self.peer_sender(peer)?;
        let call_id = {
            let mut hub = self.relay.hub();
            hub.next_call_id += 1;
            hub.next_call_id
        };
        tx.send(PeerDelivery::CallStarted { call_id })
            .map_err(|_| TransportError::Peer {
                peer: peer.clone(),
                reason: "peer went away".into(),
            })?;

        let end_tx = tx.clone();
        Ok(CallHandle::spawn(
            peer.clone(),
            call_id,
            stream,
            move |frame| tx.send(PeerDelivery::Media { call_id, frame }).is_ok(),
            move || {
                let _ = end_tx.send(PeerDelivery::CallEnded { call_id });
            },
        ))
    }

    fn disconnect_peer(&self, peer: &PeerId) {
        let mut hub = self.relay.hub();
        if let Some(tx) = hub
            .hosts
            .get_mut(&self.id)
            .and_then(|slot| slot.peers.remove(peer))
        {
            let _ = tx.send(PeerDelivery::Disconnected);
        }
    }

    async fn reconnect(&self) -> Result<PeerId, TransportError> {
        let mut hub = self.relay.hub();
        hub.reconnect_attempts += 1;
        if hub.reconnect_failures > 0 {
            hub.reconnect_failures -= 1;
            return Err(TransportError::Server {
                server: "memory".into(),
                reason: "reconnect refused".into(),
            });
        }
        let slot = hub
            .hosts
            .get_mut(&self.id)
            .ok_or_else(|| TransportError::ConnectionClosed(self.id.to_string()))?;
        slot.expired = false;
        Ok(self.id.clone())
    }

    fn close(&self) {
        let slot = self.relay.hub().hosts.remove(&self.id);
        if let Some(slot) = slot {
            for tx in slot.peers.values() {
                let _ = tx.send(PeerDelivery::Disconnected);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RemotePeer
// ---------------------------------------------------------------------------

/// A simulated remote participant connected to a host.
pub struct RemotePeer {
    id: PeerId,
    host: PeerId,
    relay: MemoryRelay,
    inbox: mpsc::UnboundedReceiver<PeerDelivery>,
}

impl RemotePeer {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Sends a raw payload on the data channel.
    pub fn send(&self, payload: serde_json::Value) -> Result<(), TransportError> {
        self.relay.emit(
            &self.host,
            RelayEvent::Data {
                peer: self.id.clone(),
                payload,
            },
        )
    }

    /// Sends one input event on the data channel.
    pub fn send_input(&self, event: &InputEvent) -> Result<(), TransportError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| TransportError::Protocol(playlink_protocol::ProtocolError::Encode(e)))?;
        self.send(payload)
    }

    /// Reports a link failure to the host.
    pub fn fail(&self, reason: &str) -> Result<(), TransportError> {
        self.relay.emit(
            &self.host,
            RelayEvent::PeerError {
                peer: self.id.clone(),
                reason: reason.to_owned(),
            },
        )
    }

    /// Closes the link from the peer's side. Calling it again re-sends the
    /// close notification, which the host must ignore.
    pub fn close(&self) -> Result<(), TransportError> {
        if let Some(slot) = self.relay.hub().hosts.get_mut(&self.host) {
            slot.peers.remove(&self.id);
        }
        self.relay
            .emit(&self.host, RelayEvent::PeerClosed(self.id.clone()))
    }

    /// Waits for the next delivery from the host.
    pub async fn recv(&mut self) -> Option<PeerDelivery> {
        self.inbox.recv().await
    }

    /// Waits for the next media frame, skipping anything else.
    pub async fn next_frame(&mut self) -> Option<MediaFrame> {
        while let Some(delivery) = self.inbox.recv().await {
            if let PeerDelivery::Media { frame, .. } = delivery {
                return Some(frame);
            }
        }
        None
    }

    /// Returns whatever is already queued without waiting.
    pub fn drain(&mut self) -> Vec<PeerDelivery> {
        let mut out = Vec::new();
        while let Ok(delivery) = self.inbox.try_recv() {
            out.push(delivery);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use playlink_protocol::InputKind;

    fn server(name: &str) -> SignalingServer {
        SignalingServer::insecure(name, "memory", 0)
    }

    #[tokio::test]
    async fn test_open_records_attempts_and_fails_down_server() {
        let relay = MemoryRelay::new();
        relay.fail_server("a");

        let id = PeerId::from("host-1");
        assert!(relay.open(&id, &server("a")).await.is_err());
        let opened = relay.open(&id, &server("b")).await.unwrap();

        assert_eq!(opened.assigned_id, id);
        assert_eq!(relay.open_attempts(), vec!["a", "b"]);
        assert!(relay.is_registered(&id));
    }

    #[tokio::test]
    async fn test_fail_server_times_recovers() {
        let relay = MemoryRelay::new();
        relay.fail_server_times("a", 1);
        let id = PeerId::from("h");
        assert!(relay.open(&id, &server("a")).await.is_err());
        assert!(relay.open(&id, &server("a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_id_taken() {
        let relay = MemoryRelay::new();
        let id = PeerId::from("h");
        let _first = relay.open(&id, &server("a")).await.unwrap();
        let err = relay.open(&id, &server("a")).await.err().unwrap();
        assert!(matches!(err, TransportError::IdTaken(_)));
    }

    #[tokio::test]
    async fn test_remote_peer_input_reaches_host_events() {
        let relay = MemoryRelay::new();
        let id = PeerId::from("h");
        let mut opened = relay.open(&id, &server("a")).await.unwrap();

        let peer = relay.connect_peer(&id, "p1").unwrap();
        let input = InputEvent::new(InputKind::Press, "KeyA", "a", 9);
        peer.send_input(&input).unwrap();

        assert_eq!(
            opened.events.recv().await,
            Some(RelayEvent::IncomingConnection(PeerId::from("p1")))
        );
        match opened.events.recv().await {
            Some(RelayEvent::Data { peer, payload }) => {
                assert_eq!(peer.as_str(), "p1");
                let back: InputEvent = serde_json::from_value(payload).unwrap();
                assert_eq!(back, input);
            }
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_delivers_media_to_remote_peer() {
        let relay = MemoryRelay::new();
        let id = PeerId::from("h");
        let opened = relay.open(&id, &server("a")).await.unwrap();
        let mut peer = relay.connect_peer(&id, "p1").unwrap();

        let stream = MediaStream::new(60);
        let _call = opened.connection.call(peer.id(), &stream).unwrap();
        assert!(matches!(peer.recv().await, Some(PeerDelivery::CallStarted { .. })));

        stream.push(Bytes::from_static(b"frame"), 16);
        let frame = peer.next_frame().await.unwrap();
        assert_eq!(&frame.data[..], b"frame");
    }

    #[tokio::test]
    async fn test_close_drops_event_channel() {
        let relay = MemoryRelay::new();
        let id = PeerId::from("h");
        let mut opened = relay.open(&id, &server("a")).await.unwrap();
        opened.connection.close();
        opened.connection.close();
        assert!(opened.events.recv().await.is_none());
        assert!(!relay.is_registered(&id));
    }

    #[tokio::test]
    async fn test_reconnect_failures_are_counted() {
        let relay = MemoryRelay::new();
        let id = PeerId::from("h");
        let opened = relay.open(&id, &server("a")).await.unwrap();
        relay.fail_reconnects(1);
        assert!(opened.connection.reconnect().await.is_err());
        assert_eq!(opened.connection.reconnect().await.unwrap(), id);
        assert_eq!(relay.reconnect_attempts(), 2);
    }
}
