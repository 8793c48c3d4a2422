//! Signaling relay client over WebSocket using `tokio-tungstenite`.
//!
//! Each registration owns two tasks: a writer that drains an outbound
//! frame queue (and sends heartbeats), and a reader that turns inbound
//! frames into [`RelayEvent`]s. A reconnect replaces both; the event
//! channel handed out by [`WebSocketRelay::open`] survives it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use playlink_protocol::{PeerId, ProtocolError, RelayFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    CallHandle, MediaStream, OpenedRelay, RelayEvent, SignalingConnection, SignalingRelay,
    SignalingServer, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Opens registrations against WebSocket relay servers.
#[derive(Debug, Clone)]
pub struct WebSocketRelay {
    /// Bound on connecting plus waiting for `REGISTERED`.
    pub open_timeout: Duration,
    /// Keep-alive interval.
    pub heartbeat: Duration,
}

impl Default for WebSocketRelay {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(10),
            heartbeat: Duration::from_secs(5),
        }
    }
}

impl SignalingRelay for WebSocketRelay {
    type Connection = WebSocketLink;

    async fn open(
        &self,
        local_id: &PeerId,
        server: &SignalingServer,
    ) -> Result<OpenedRelay<WebSocketLink>, TransportError> {
        let (sink, source, assigned_id) = register(server, local_id, self.open_timeout).await?;
        tracing::info!(server = %server.name, peer_id = %assigned_id, "registered with relay");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(LinkInner {
            id: assigned_id.clone(),
            server: server.clone(),
            open_timeout: self.open_timeout,
            heartbeat: self.heartbeat,
            events: events_tx,
            outbound: Mutex::new(None),
            generation: AtomicU64::new(0),
            next_call_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        inner.attach(sink, source, 0);

        Ok(OpenedRelay {
            connection: WebSocketLink { inner },
            assigned_id,
            events: events_rx,
        })
    }
}

/// A registered WebSocket relay connection. Cheap to clone.
#[derive(Clone)]
pub struct WebSocketLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    id: PeerId,
    server: SignalingServer,
    open_timeout: Duration,
    heartbeat: Duration,
    events: mpsc::UnboundedSender<RelayEvent>,
    /// Queue feeding the current writer task.
    outbound: Mutex<Option<mpsc::UnboundedSender<RelayFrame>>>,
    /// Bumped on every reconnect so a stale reader stays quiet.
    generation: AtomicU64,
    next_call_id: AtomicU64,
    closed: AtomicBool,
}

impl LinkInner {
    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<RelayFrame>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_frame(&self, frame: RelayFrame) -> Result<(), TransportError> {
        self.outbound()
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionClosed(self.id.to_string()))?
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed(self.id.to_string()))
    }

    /// Spawns the writer and reader for a freshly registered socket.
    fn attach(self: &Arc<Self>, mut sink: WsSink, mut source: WsSource, generation: u64) {
        let (tx, mut rx) = mpsc::unbounded_channel::<RelayFrame>();
        *self.outbound() = Some(tx);

        let heartbeat = self.heartbeat;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            ticker.tick().await;
            loop {
                let frame = tokio::select! {
                    frame = rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                    _ = ticker.tick() => RelayFrame::Heartbeat,
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unencodable relay frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match next_frame(&mut source).await {
                    Ok(Some(frame)) => inner.dispatch(frame),
                    Ok(None) => break,
                    Err(TransportError::Protocol(e)) => {
                        tracing::warn!(
                            peer_id = %inner.id,
                            error = %e,
                            "ignoring malformed relay frame"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(peer_id = %inner.id, error = %e, "relay socket failed");
                        break;
                    }
                }
            }
            let current = inner.generation.load(Ordering::Acquire) == generation;
            if current && !inner.closed.load(Ordering::Acquire) {
                let _ = inner.events.send(RelayEvent::Disconnected);
            }
        });
    }

    fn dispatch(&self, frame: RelayFrame) {
        let event = match frame {
            RelayFrame::Incoming { peer } => RelayEvent::IncomingConnection(peer),
            RelayFrame::Data { peer, payload } => RelayEvent::Data { peer, payload },
            RelayFrame::Leave { peer } => RelayEvent::PeerClosed(peer),
            RelayFrame::PeerError { peer, message } => RelayEvent::PeerError {
                peer,
                reason: message,
            },
            RelayFrame::Expire => RelayEvent::IdentityExpired,
            RelayFrame::Error { message } => RelayEvent::ServerError(message),
            other => {
                tracing::debug!(peer_id = %self.id, frame = ?other, "unhandled relay frame");
                return;
            }
        };
        let _ = self.events.send(event);
    }
}

impl SignalingConnection for WebSocketLink {
    fn send(&self, peer: &PeerId, payload: serde_json::Value) -> Result<(), TransportError> {
        self.inner.send_frame(RelayFrame::Data {
            peer: peer.clone(),
            payload,
        })
    }

    fn call(&self, peer: &PeerId, stream: &MediaStream) -> Result<CallHandle, TransportError> {
        let call_id = self.inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        self.inner.send_frame(RelayFrame::Call {
            peer: peer.clone(),
            call_id,
        })?;

        let forward_inner = Arc::clone(&self.inner);
        let forward_peer = peer.clone();
        let end_inner = Arc::clone(&self.inner);
        let end_peer = peer.clone();
        Ok(CallHandle::spawn(
            peer.clone(),
            call_id,
            stream,
            move |frame| {
                forward_inner
                    .send_frame(RelayFrame::Media {
                        peer: forward_peer.clone(),
                        call_id,
                        frame,
                    })
                    .is_ok()
            },
            move || {
                let _ = end_inner.send_frame(RelayFrame::Hangup {
                    peer: end_peer,
                    call_id,
                });
            },
        ))
    }

    fn disconnect_peer(&self, peer: &PeerId) {
        let _ = self.inner.send_frame(RelayFrame::Leave { peer: peer.clone() });
    }

    async fn reconnect(&self) -> Result<PeerId, TransportError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(inner.id.to_string()));
        }
        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (sink, source, assigned) =
            register(&inner.server, &inner.id, inner.open_timeout).await?;
        inner.attach(sink, source, generation);
        tracing::info!(server = %inner.server.name, peer_id = %assigned, "relay reconnected");
        Ok(assigned)
    }

    fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            // Dropping the queue ends the writer, which closes the socket.
            self.inner.outbound().take();
            tracing::debug!(peer_id = %self.inner.id, "relay link closed");
        }
    }
}

/// Connects to `server`, registers `id`, and waits for the verdict.
async fn register(
    server: &SignalingServer,
    id: &PeerId,
    open_timeout: Duration,
) -> Result<(WsSink, WsSource, PeerId), TransportError> {
    let server_error = |reason: String| TransportError::Server {
        server: server.name.clone(),
        reason,
    };

    let url = server.url();
    let (ws, _) = tokio::time::timeout(open_timeout, tokio_tungstenite::connect_async(url.as_str()))
        .await
        .map_err(|_| TransportError::Timeout(server.name.clone()))?
        .map_err(|e| server_error(e.to_string()))?;
    let (mut sink, mut source) = ws.split();

    let hello = serde_json::to_string(&RelayFrame::Register { id: id.clone() })
        .map_err(ProtocolError::Encode)?;
    sink.send(Message::Text(hello.into()))
        .await
        .map_err(|e| server_error(e.to_string()))?;

    let reply = tokio::time::timeout(open_timeout, next_frame(&mut source))
        .await
        .map_err(|_| TransportError::Timeout(server.name.clone()))??;

    match reply {
        Some(RelayFrame::Registered { id: assigned }) => Ok((sink, source, assigned)),
        Some(RelayFrame::IdTaken { id: taken }) => Err(TransportError::IdTaken(taken)),
        Some(RelayFrame::Error { message }) => Err(server_error(message)),
        Some(other) => Err(server_error(format!("unexpected reply {other:?}"))),
        None => Err(TransportError::ConnectionClosed(server.name.clone())),
    }
}

/// Reads the next relay frame, skipping control messages.
async fn next_frame(source: &mut WsSource) -> Result<Option<RelayFrame>, TransportError> {
    loop {
        let frame = match source.next().await {
            Some(Ok(Message::Text(text))) => serde_json::from_str(text.as_str()),
            Some(Ok(Message::Binary(data))) => serde_json::from_slice(&data),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::ConnectionClosed(e.to_string())),
        };
        return frame
            .map(Some)
            .map_err(|e| TransportError::Protocol(ProtocolError::Decode(e)));
    }
}
