//! Peer connection manager: the host's signaling identity and peer links.
//!
//! A single actor task owns the [`ConnectionMachine`], the signaling
//! connection, every [`PeerLink`] and the input relay. The public
//! [`PeerConnectionManager`] handle talks to it over a command channel and
//! reads published state from `watch` channels, so nothing is shared
//! between tasks.
//!
//! Slow work (opening a server, reconnecting, cool-down timers) runs on
//! helper tasks that report back on an internal channel, tagged with a
//! generation number. Anything reporting under an old generation is
//! discarded, which makes `stop` immediate and race-free.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use playlink_protocol::{InputEvent, PeerId, PlayerId, SessionId};
use playlink_transport::{
    MediaStream, OpenedRelay, RelayEvent, SignalingConnection, SignalingRelay, TransportError,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::link::{MediaCallState, PeerLink, PeerLinkInfo};
use crate::machine::{Action, ConnectionAttemptState, ConnectionMachine, ConnectionState, Signal};
use crate::{InputRelay, InputSink, PeerConfig, PeerError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Coarse signaling status for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerStatus {
    /// Not started, or stopped.
    #[default]
    Idle,
    Connecting,
    /// Identity live; peers can connect.
    Ready,
    Reconnecting,
    /// The circuit is open. Show "unavailable" and offer a manual retry.
    Unavailable,
}

impl From<&ConnectionState> for ManagerStatus {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self::Idle,
            ConnectionState::Connecting { .. } | ConnectionState::CoolingDown { .. } => {
                Self::Connecting
            }
            ConnectionState::Connected { .. } => Self::Ready,
            ConnectionState::Reconnecting { .. } => Self::Reconnecting,
            ConnectionState::Disabled => Self::Unavailable,
        }
    }
}

/// Something the host UI may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    IdentityReady(PeerId),
    IdentityLost,
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    /// One link failed; the rest of the session is unaffected.
    PeerFailed { peer: PeerId, reason: String },
    /// The circuit opened.
    Unavailable,
}

type PeerObserver = Box<dyn FnMut(&PeerId) + Send>;

enum ManagerCommand {
    Start {
        session_id: SessionId,
        user_id: PlayerId,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Retry,
    OnPeerJoined(PeerObserver),
    OnPeerLeft(PeerObserver),
    SetInputSink(Box<dyn InputSink>),
    AttachStream {
        stream: MediaStream,
        reply: oneshot::Sender<usize>,
    },
    DetachStream {
        reply: oneshot::Sender<usize>,
    },
    SendTo {
        peer: PeerId,
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<(), PeerError>>,
    },
    Broadcast {
        payload: serde_json::Value,
        reply: oneshot::Sender<usize>,
    },
    Links {
        reply: oneshot::Sender<Vec<PeerLinkInfo>>,
    },
    AttemptState {
        reply: oneshot::Sender<ConnectionAttemptState>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running connection manager. Cheap to clone.
///
/// The actor stops once every handle is dropped, releasing the identity
/// and every link.
#[derive(Clone)]
pub struct PeerConnectionManager {
    sender: mpsc::Sender<ManagerCommand>,
    status: watch::Receiver<ManagerStatus>,
    identity: watch::Receiver<Option<PeerId>>,
    peers: watch::Receiver<BTreeSet<PeerId>>,
    events: broadcast::Sender<HostEvent>,
}

impl PeerConnectionManager {
    /// Spawns a manager that connects through `relay`.
    pub fn spawn<R: SignalingRelay>(relay: R, config: PeerConfig) -> Self {
        Self::spawn_with_attempts(relay, config, ConnectionAttemptState::default())
    }

    /// Spawns a manager with existing failover bookkeeping.
    pub fn spawn_with_attempts<R: SignalingRelay>(
        relay: R,
        config: PeerConfig,
        attempts: ConnectionAttemptState,
    ) -> Self {
        let config = config.validated();
        let (tx, rx) = mpsc::channel(config.channel_size);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ManagerStatus::Idle);
        let (identity_tx, identity_rx) = watch::channel(None);
        let (peers_tx, peers_rx) = watch::channel(BTreeSet::new());
        let (events, _) = broadcast::channel(256);

        let actor = ManagerActor {
            relay: Arc::new(relay),
            machine: ConnectionMachine::with_attempts(&config, attempts),
            config,
            context: None,
            connection: None,
            relay_events: None,
            generation: 0,
            pending: None,
            internal_tx,
            internal_rx,
            commands: rx,
            links: HashMap::new(),
            stream: None,
            input: InputRelay::new(),
            joined_observers: Vec::new(),
            left_observers: Vec::new(),
            status: status_tx,
            identity: identity_tx,
            peers: peers_tx,
            events: events.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            sender: tx,
            status: status_rx,
            identity: identity_rx,
            peers: peers_rx,
            events,
        }
    }

    async fn command(&self, cmd: ManagerCommand) -> Result<(), PeerError> {
        self.sender.send(cmd).await.map_err(|_| PeerError::Unavailable)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, PeerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| PeerError::Unavailable)
    }

    /// Begins connecting in the background. A no-op while already
    /// connecting or connected, and while the circuit is open.
    pub async fn start(&self, session_id: SessionId, user_id: PlayerId) -> Result<(), PeerError> {
        self.command(ManagerCommand::Start {
            session_id,
            user_id,
        })
        .await
    }

    /// Tears down every link and releases the identity. Safe to call
    /// repeatedly, before `start`, or after the actor is gone.
    pub async fn stop(&self) {
        let _ = self.request(|reply| ManagerCommand::Stop { reply }).await;
    }

    /// Closes the circuit and connects again. The manual retry behind an
    /// "unavailable" banner.
    pub async fn retry(&self) -> Result<(), PeerError> {
        self.command(ManagerCommand::Retry).await
    }

    pub async fn on_peer_joined(
        &self,
        handler: impl FnMut(&PeerId) + Send + 'static,
    ) -> Result<(), PeerError> {
        self.command(ManagerCommand::OnPeerJoined(Box::new(handler))).await
    }

    pub async fn on_peer_left(
        &self,
        handler: impl FnMut(&PeerId) + Send + 'static,
    ) -> Result<(), PeerError> {
        self.command(ManagerCommand::OnPeerLeft(Box::new(handler))).await
    }

    /// Registers the single input sink, replacing any previous one.
    pub async fn on_input_received(&self, sink: impl InputSink) -> Result<(), PeerError> {
        self.command(ManagerCommand::SetInputSink(Box::new(sink))).await
    }

    pub fn current_identity(&self) -> Option<PeerId> {
        self.identity.borrow().clone()
    }

    pub fn connected_peers(&self) -> BTreeSet<PeerId> {
        self.peers.borrow().clone()
    }

    pub fn status(&self) -> ManagerStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ManagerStatus> {
        self.status.clone()
    }

    pub fn watch_identity(&self) -> watch::Receiver<Option<PeerId>> {
        self.identity.clone()
    }

    pub fn watch_peers(&self) -> watch::Receiver<BTreeSet<PeerId>> {
        self.peers.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Starts sending `stream` to every link, and to every link that
    /// connects later. Returns the number of legs started.
    pub async fn attach_stream(&self, stream: MediaStream) -> Result<usize, PeerError> {
        self.request(|reply| ManagerCommand::AttachStream { stream, reply })
            .await
    }

    /// Closes every media leg. Returns the number closed.
    pub async fn detach_stream(&self) -> Result<usize, PeerError> {
        self.request(|reply| ManagerCommand::DetachStream { reply }).await
    }

    /// Sends a payload to one peer's data channel.
    pub async fn send_to(
        &self,
        peer: &PeerId,
        payload: serde_json::Value,
    ) -> Result<(), PeerError> {
        let peer = peer.clone();
        self.request(|reply| ManagerCommand::SendTo {
            peer,
            payload,
            reply,
        })
        .await?
    }

    /// Sends a payload to every open link. Returns how many got it.
    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<usize, PeerError> {
        self.request(|reply| ManagerCommand::Broadcast { payload, reply })
            .await
    }

    pub async fn links(&self) -> Result<Vec<PeerLinkInfo>, PeerError> {
        self.request(|reply| ManagerCommand::Links { reply }).await
    }

    pub async fn attempt_state(&self) -> Result<ConnectionAttemptState, PeerError> {
        self.request(|reply| ManagerCommand::AttemptState { reply }).await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct StartContext {
    session_id: SessionId,
    user_id: PlayerId,
}

enum Internal<C> {
    Opened {
        generation: u64,
        server: String,
        result: Result<OpenedRelay<C>, TransportError>,
    },
    Reconnected {
        generation: u64,
        result: Result<PeerId, TransportError>,
    },
    RetryTimer {
        generation: u64,
    },
}

struct ManagerActor<R: SignalingRelay> {
    relay: Arc<R>,
    config: PeerConfig,
    machine: ConnectionMachine,
    context: Option<StartContext>,
    connection: Option<R::Connection>,
    relay_events: Option<mpsc::UnboundedReceiver<RelayEvent>>,
    /// Bumped whenever pending work is superseded.
    generation: u64,
    pending: Option<JoinHandle<()>>,
    internal_tx: mpsc::UnboundedSender<Internal<R::Connection>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<R::Connection>>,
    commands: mpsc::Receiver<ManagerCommand>,
    links: HashMap<PeerId, PeerLink>,
    stream: Option<MediaStream>,
    input: InputRelay,
    joined_observers: Vec<PeerObserver>,
    left_observers: Vec<PeerObserver>,
    status: watch::Sender<ManagerStatus>,
    identity: watch::Sender<Option<PeerId>>,
    peers: watch::Sender<BTreeSet<PeerId>>,
    events: broadcast::Sender<HostEvent>,
}

impl<R: SignalingRelay> ManagerActor<R> {
    async fn run(mut self) {
        tracing::debug!(servers = self.config.servers.len(), "peer connection manager started");

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
                Some(msg) = self.internal_rx.recv() => self.on_internal(msg),
                event = next_event(&mut self.relay_events) => match event {
                    Some(event) => self.on_relay_event(event),
                    None => self.on_relay_closed(),
                },
            }
        }

        let actions = self.machine.handle(Signal::Stop);
        self.apply(actions);
        tracing::debug!("peer connection manager stopped");
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    fn on_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Start {
                session_id,
                user_id,
            } => {
                if self.machine.attempts().circuit_open {
                    tracing::warn!(%session_id, "signaling unavailable, start ignored until retry");
                }
                self.context = Some(StartContext {
                    session_id,
                    user_id,
                });
                self.signal(Signal::Start);
            }
            ManagerCommand::Stop { reply } => {
                self.signal(Signal::Stop);
                let _ = reply.send(());
            }
            ManagerCommand::Retry => {
                if self.context.is_none() {
                    tracing::debug!("retry before start, nothing to do");
                    return;
                }
                tracing::info!("manual signaling retry");
                self.signal(Signal::ManualRetry);
            }
            ManagerCommand::OnPeerJoined(observer) => self.joined_observers.push(observer),
            ManagerCommand::OnPeerLeft(observer) => self.left_observers.push(observer),
            ManagerCommand::SetInputSink(sink) => self.input.set_sink(sink),
            ManagerCommand::AttachStream { stream, reply } => {
                let _ = reply.send(self.attach_stream(stream));
            }
            ManagerCommand::DetachStream { reply } => {
                let _ = reply.send(self.detach_stream());
            }
            ManagerCommand::SendTo {
                peer,
                payload,
                reply,
            } => {
                let _ = reply.send(self.send_to(&peer, payload));
            }
            ManagerCommand::Broadcast { payload, reply } => {
                let _ = reply.send(self.broadcast(payload));
            }
            ManagerCommand::Links { reply } => {
                let mut links: Vec<PeerLinkInfo> =
                    self.links.values().map(PeerLink::info).collect();
                links.sort_by(|a, b| a.peer.cmp(&b.peer));
                let _ = reply.send(links);
            }
            ManagerCommand::AttemptState { reply } => {
                let _ = reply.send(*self.machine.attempts());
            }
        }
    }

    fn on_internal(&mut self, msg: Internal<R::Connection>) {
        match msg {
            Internal::Opened {
                generation,
                server,
                result,
            } => {
                if generation != self.generation {
                    if let Ok(stale) = result {
                        stale.connection.close();
                    }
                    return;
                }
                self.pending = None;
                match result {
                    Ok(opened) => {
                        tracing::info!(
                            %server,
                            identity = %opened.assigned_id,
                            "signaling identity acknowledged"
                        );
                        self.connection = Some(opened.connection);
                        self.relay_events = Some(opened.events);
                        self.signal(Signal::Opened {
                            identity: opened.assigned_id,
                        });
                    }
                    Err(error) => {
                        tracing::warn!(
                            %server,
                            %error,
                            server_failure = error.is_server_failure(),
                            "signaling server failed"
                        );
                        self.signal(Signal::OpenFailed);
                    }
                }
            }
            Internal::Reconnected { generation, result } => {
                if generation != self.generation {
                    return;
                }
                self.pending = None;
                match result {
                    Ok(identity) => {
                        tracing::info!(%identity, "signaling identity restored");
                        self.signal(Signal::Reconnected { identity });
                    }
                    Err(error) => {
                        tracing::warn!(%error, "signaling reconnect failed");
                        self.signal(Signal::ReconnectFailed);
                    }
                }
            }
            Internal::RetryTimer { generation } => {
                if generation != self.generation {
                    return;
                }
                self.pending = None;
                self.signal(Signal::RetryTimerFired);
            }
        }
    }

    fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::IncomingConnection(peer) => self.accept(peer),
            RelayEvent::Data { peer, payload } => self.on_data(peer, payload),
            RelayEvent::PeerClosed(peer) => self.remove_link(&peer),
            RelayEvent::PeerError { peer, reason } => {
                tracing::warn!(%peer, %reason, "peer link failed");
                let _ = self.events.send(HostEvent::PeerFailed {
                    peer: peer.clone(),
                    reason,
                });
                if let Some(connection) = &self.connection {
                    connection.disconnect_peer(&peer);
                }
                self.remove_link(&peer);
            }
            RelayEvent::IdentityExpired => {
                tracing::warn!("signaling identity expired");
                self.signal(Signal::IdentityInvalidated);
            }
            RelayEvent::Disconnected => {
                tracing::warn!("signaling socket dropped");
                self.signal(Signal::IdentityInvalidated);
            }
            RelayEvent::ServerError(message) => {
                tracing::warn!(%message, "signaling server error");
            }
        }
    }

    fn on_relay_closed(&mut self) {
        self.relay_events = None;
        if self.machine.state().is_connected() {
            tracing::warn!("signaling event feed closed");
            self.signal(Signal::IdentityInvalidated);
        }
    }

    // -----------------------------------------------------------------------
    // State machine glue
    // -----------------------------------------------------------------------

    fn signal(&mut self, signal: Signal) {
        let actions = self.machine.handle(signal);
        self.apply(actions);
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Open { server_index } => self.open(server_index),
                Action::ScheduleRetry { delay } => self.schedule_retry(delay),
                Action::Reconnect { attempt } => self.reconnect(attempt),
                Action::IdentityReady(identity) => {
                    self.identity.send_replace(Some(identity.clone()));
                    let _ = self.events.send(HostEvent::IdentityReady(identity));
                }
                Action::IdentityLost => {
                    self.identity.send_replace(None);
                    let _ = self.events.send(HostEvent::IdentityLost);
                }
                Action::Release => self.release(),
                Action::Disable => {
                    let attempts = self.machine.attempts();
                    tracing::error!(
                        cycles = attempts.attempt_count,
                        servers = self.config.servers.len(),
                        "signaling unavailable, circuit open"
                    );
                    let _ = self.events.send(HostEvent::Unavailable);
                }
            }
        }
        let status = ManagerStatus::from(self.machine.state());
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    /// Invalidates pending work and returns the new generation.
    fn supersede(&mut self) -> u64 {
        self.generation += 1;
        if let Some(task) = self.pending.take() {
            task.abort();
        }
        self.generation
    }

    fn open(&mut self, server_index: usize) {
        let generation = self.supersede();
        let Some(context) = &self.context else {
            tracing::warn!("open requested without a session, ignoring");
            return;
        };
        let Some(server) = self.config.servers.get(server_index).cloned() else {
            let _ = self.internal_tx.send(Internal::Opened {
                generation,
                server: format!("#{server_index}"),
                result: Err(TransportError::Server {
                    server: format!("#{server_index}"),
                    reason: "no such server".into(),
                }),
            });
            return;
        };

        let local_id = PeerId::for_host(
            &context.session_id,
            &context.user_id,
            Utc::now().timestamp_millis(),
        );
        tracing::info!(server = %server.name, %local_id, "opening signaling connection");

        let relay = Arc::clone(&self.relay);
        let tx = self.internal_tx.clone();
        self.pending = Some(tokio::spawn(async move {
            let result = relay.open(&local_id, &server).await;
            let _ = tx.send(Internal::Opened {
                generation,
                server: server.name,
                result,
            });
        }));
    }

    fn schedule_retry(&mut self, delay: Duration) {
        let generation = self.supersede();
        tracing::warn!(?delay, "every signaling server failed, waiting before next cycle");
        let tx = self.internal_tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::RetryTimer { generation });
        }));
    }

    fn reconnect(&mut self, attempt: u32) {
        let generation = self.supersede();
        let Some(connection) = self.connection.clone() else {
            let _ = self.internal_tx.send(Internal::Reconnected {
                generation,
                result: Err(TransportError::ConnectionClosed("no signaling connection".into())),
            });
            return;
        };
        tracing::info!(attempt, "reconnecting signaling identity");
        let tx = self.internal_tx.clone();
        self.pending = Some(tokio::spawn(async move {
            let result = connection.reconnect().await;
            let _ = tx.send(Internal::Reconnected { generation, result });
        }));
    }

    /// Drops the connection and every link. Pending work is superseded.
    fn release(&mut self) {
        self.supersede();
        let peers: Vec<PeerId> = self.links.keys().cloned().collect();
        for peer in &peers {
            if let Some(connection) = &self.connection {
                connection.disconnect_peer(peer);
            }
            self.remove_link(peer);
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
            tracing::info!("signaling identity released");
        }
        self.relay_events = None;
        self.identity.send_replace(None);
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    fn accept(&mut self, peer: PeerId) {
        let Some(connection) = self.connection.clone() else {
            return;
        };
        if !self.machine.state().is_connected() {
            tracing::debug!(%peer, "incoming connection while not ready, refusing");
            connection.disconnect_peer(&peer);
            return;
        }

        let mut link = PeerLink::open(peer.clone());
        if let Some(stream) = self.stream.as_ref().filter(|s| !s.is_ended()) {
            match connection.call(&peer, stream) {
                Ok(call) => {
                    tracing::info!(
                        %peer,
                        stream_id = stream.id(),
                        "sending active stream to new peer"
                    );
                    link.start_call(call);
                }
                Err(error) => {
                    tracing::warn!(%peer, %error, "could not start media leg");
                    link.call_failed();
                }
            }
        }

        if let Some(mut previous) = self.links.insert(peer.clone(), link) {
            previous.end_call();
            tracing::debug!(%peer, "peer reconnected, replaced link");
            return;
        }

        tracing::info!(%peer, peers = self.links.len(), "peer joined");
        self.publish_peers();
        for observer in &mut self.joined_observers {
            observer(&peer);
        }
        let _ = self.events.send(HostEvent::PeerJoined(peer));
    }

    /// Removes a link and fires peer-left. Unknown peers are ignored, so
    /// repeated close notifications fire nothing.
    fn remove_link(&mut self, peer: &PeerId) {
        let Some(mut link) = self.links.remove(peer) else {
            return;
        };
        link.close();
        tracing::info!(%peer, peers = self.links.len(), "peer left");
        self.publish_peers();
        for observer in &mut self.left_observers {
            observer(peer);
        }
        let _ = self.events.send(HostEvent::PeerLeft(peer.clone()));
    }

    fn on_data(&mut self, peer: PeerId, payload: serde_json::Value) {
        if !self.links.get(&peer).is_some_and(PeerLink::is_open) {
            tracing::debug!(%peer, "data from unknown peer, ignoring");
            return;
        }
        match serde_json::from_value::<InputEvent>(payload) {
            Ok(event) => {
                self.input.relay(&peer, event);
            }
            Err(error) => {
                tracing::debug!(%peer, %error, "ignoring non-input payload");
            }
        }
    }

    fn publish_peers(&self) {
        let peers: BTreeSet<PeerId> = self.links.keys().cloned().collect();
        self.peers.send_replace(peers);
    }

    // -----------------------------------------------------------------------
    // Stream and data
    // -----------------------------------------------------------------------

    fn attach_stream(&mut self, stream: MediaStream) -> usize {
        if self.stream.as_ref().is_some_and(|s| s.same_stream(&stream)) {
            return self
                .links
                .values()
                .filter(|l| l.info().media == MediaCallState::Sending)
                .count();
        }
        self.detach_stream();

        let mut started = 0;
        if let Some(connection) = &self.connection {
            for (peer, link) in &mut self.links {
                match connection.call(peer, &stream) {
                    Ok(call) => {
                        link.start_call(call);
                        started += 1;
                    }
                    Err(error) => {
                        tracing::warn!(%peer, %error, "could not start media leg");
                        link.call_failed();
                    }
                }
            }
        }
        tracing::info!(stream_id = stream.id(), legs = started, "stream attached");
        self.stream = Some(stream);
        started
    }

    fn detach_stream(&mut self) -> usize {
        if self.stream.take().is_none() {
            return 0;
        }
        let closed = self
            .links
            .values_mut()
            .map(PeerLink::end_call)
            .filter(|closed| *closed)
            .count();
        tracing::info!(legs = closed, "stream detached");
        closed
    }

    fn send_to(&self, peer: &PeerId, payload: serde_json::Value) -> Result<(), PeerError> {
        let connection = self.connection.as_ref().ok_or(PeerError::NotConnected)?;
        if !self.links.get(peer).is_some_and(PeerLink::is_open) {
            return Err(PeerError::UnknownPeer(peer.clone()));
        }
        connection.send(peer, payload)?;
        Ok(())
    }

    fn broadcast(&self, payload: serde_json::Value) -> usize {
        let Some(connection) = &self.connection else {
            return 0;
        };
        let mut delivered = 0;
        for (peer, link) in &self.links {
            if !link.is_open() {
                continue;
            }
            match connection.send(peer, payload.clone()) {
                Ok(()) => delivered += 1,
                Err(error) => tracing::debug!(%peer, %error, "broadcast delivery failed"),
            }
        }
        if delivered > 0 {
            tracing::debug!(delivered, "broadcast sent");
        }
        delivered
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<RelayEvent>>,
) -> Option<RelayEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
