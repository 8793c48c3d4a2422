//! `HostSession`: one hosted room, end to end.
//!
//! Ties the layers together for the host: directory record, signaling
//! identity, stream fan-out, input relay and the room reaper.

use std::sync::Arc;

use playlink_directory::{DirectoryError, LastWill, NewSession, SessionDirectory, SessionService};
use playlink_peer::{CaptureSource, InputSink, PeerConnectionManager, StreamFanout};
use playlink_protocol::{PeerId, PlayerId, SessionId, SessionRecord, SessionStatus};
use playlink_retry::{RetryError, RetryPolicy, retry};
use playlink_room::{ReaperEvent, ReaperHandle, spawn_reaper};
use playlink_transport::{MediaStream, SignalingRelay};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{PlaylinkConfig, PlaylinkError};

/// A room this process hosts.
///
/// Created with [`HostSession::create`]; torn down with
/// [`HostSession::close`]. Dropping it without closing leaves the last
/// will armed, so the record is still deleted on a best-effort basis.
pub struct HostSession<D: SessionDirectory, C: CaptureSource> {
    service: SessionService<D>,
    session_id: SessionId,
    host_id: PlayerId,
    manager: PeerConnectionManager,
    fanout: StreamFanout<C>,
    reaper: ReaperHandle,
    reaper_events: Option<mpsc::UnboundedReceiver<ReaperEvent>>,
    publisher: JoinHandle<()>,
    will: LastWill<D>,
}

impl<D: SessionDirectory, C: CaptureSource> HostSession<D, C> {
    /// Creates the room and brings every component up.
    ///
    /// Signaling connects in the background; the directory record gets
    /// `signalingId`/`signalingReady` as soon as an identity is live, and
    /// again whenever it changes.
    ///
    /// # Errors
    /// Directory errors from creating the record or subscribing the
    /// reaper. Once the record exists, a later failure still deletes it
    /// through the last will.
    pub async fn create<R: SignalingRelay>(
        directory: Arc<D>,
        relay: R,
        capture: C,
        config: PlaylinkConfig,
        new_session: NewSession,
    ) -> Result<Self, PlaylinkError> {
        let config = config.validated();
        let service = SessionService::new(Arc::clone(&directory));
        let record = service.create_session(new_session).await?;
        let session_id = record.id.clone();
        let host_id = record.host_id.clone();
        let will = LastWill::new(Arc::clone(&directory), session_id.clone());

        let manager = PeerConnectionManager::spawn(relay, config.peer.clone());
        let publisher = spawn_signaling_publisher(
            service.clone(),
            session_id.clone(),
            host_id.clone(),
            manager.watch_identity(),
            config.publish.retry,
        );
        manager.start(session_id.clone(), host_id.clone()).await?;

        let (reaper, reaper_events) =
            match spawn_reaper(directory, session_id.clone(), config.reaper).await {
                Ok(spawned) => spawned,
                Err(e) => {
                    publisher.abort();
                    manager.stop().await;
                    return Err(e.into());
                }
            };
        let fanout = StreamFanout::new(capture, manager.clone(), config.capture);

        tracing::info!(%session_id, %host_id, game = %record.game_id, "hosting session");
        Ok(Self {
            service,
            session_id,
            host_id,
            manager,
            fanout,
            reaper,
            reaper_events: Some(reaper_events),
            publisher,
            will,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn host_id(&self) -> &PlayerId {
        &self.host_id
    }

    pub fn manager(&self) -> &PeerConnectionManager {
        &self.manager
    }

    pub fn service(&self) -> &SessionService<D> {
        &self.service
    }

    /// The current record, read from the directory.
    pub async fn record(&self) -> Result<SessionRecord, PlaylinkError> {
        Ok(self.service.directory().get(&self.session_id).await?)
    }

    /// Routes peer input to `sink`.
    pub async fn on_input_received(&self, sink: impl InputSink) -> Result<(), PlaylinkError> {
        Ok(self.manager.on_input_received(sink).await?)
    }

    /// Takes the reaper's event feed. Returns `None` after the first call.
    pub fn reaper_events(&mut self) -> Option<mpsc::UnboundedReceiver<ReaperEvent>> {
        self.reaper_events.take()
    }

    /// Starts streaming `surface` to every peer and marks the session
    /// playing.
    ///
    /// # Errors
    /// Capture errors, or directory errors from the status change. If the
    /// status change fails the stream keeps running.
    pub async fn start_streaming(
        &self,
        surface: &C::Surface,
    ) -> Result<MediaStream, PlaylinkError> {
        let stream = self.fanout.start_streaming(surface).await?;
        self.service
            .set_status(&self.session_id, &self.host_id, SessionStatus::Playing)
            .await?;
        Ok(stream)
    }

    pub async fn stop_streaming(&self) {
        self.fanout.stop_streaming().await;
    }

    pub async fn is_streaming(&self) -> bool {
        self.fanout.is_streaming().await
    }

    /// Ends the session: stops streaming and signaling, shuts the reaper
    /// down and deletes the record.
    ///
    /// # Errors
    /// Directory errors from the delete. The last will stays armed in
    /// that case and retries the delete on drop.
    pub async fn close(mut self) -> Result<(), PlaylinkError> {
        self.publisher.abort();
        self.fanout.stop_streaming().await;
        self.manager.stop().await;
        self.reaper.shutdown().await;
        self.service.close(&self.session_id, &self.host_id).await?;
        self.will.disarm();
        tracing::info!(session_id = %self.session_id, "session closed");
        Ok(())
    }
}

impl<D: SessionDirectory, C: CaptureSource> Drop for HostSession<D, C> {
    fn drop(&mut self) {
        self.publisher.abort();
    }
}

// ---------------------------------------------------------------------------
// Signaling publication
// ---------------------------------------------------------------------------

/// Mirrors the manager's identity into the session record until the
/// record disappears or the identity feed closes.
fn spawn_signaling_publisher<D: SessionDirectory>(
    service: SessionService<D>,
    session_id: SessionId,
    host_id: PlayerId,
    mut identity: watch::Receiver<Option<PeerId>>,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // A new record carries no signaling id.
        let mut published: Option<PeerId> = None;
        loop {
            let current = identity.borrow_and_update().clone();
            if published != current {
                match publish(&service, &session_id, &host_id, current.clone(), &policy).await {
                    Ok(()) => published = current,
                    Err(DirectoryError::NotFound(_)) => {
                        tracing::debug!(%session_id, "session gone, signaling publisher exiting");
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(%session_id, %error, "could not publish signaling identity");
                    }
                }
            }
            if identity.changed().await.is_err() {
                return;
            }
        }
    })
}

async fn publish<D: SessionDirectory>(
    service: &SessionService<D>,
    session_id: &SessionId,
    host_id: &PlayerId,
    signaling_id: Option<PeerId>,
    policy: &RetryPolicy,
) -> Result<(), DirectoryError> {
    retry(
        policy,
        "publish signaling",
        |_| service.publish_signaling(session_id, host_id, signaling_id.clone()),
        DirectoryError::is_transient,
    )
    .await
    .map_err(RetryError::into_inner)?;

    match &signaling_id {
        Some(peer_id) => tracing::info!(%session_id, %peer_id, "signaling identity published"),
        None => tracing::info!(%session_id, "signaling identity withdrawn"),
    }
    Ok(())
}
