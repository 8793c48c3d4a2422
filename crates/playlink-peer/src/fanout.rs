//! Stream fan-out: one captured stream, one media leg per peer.

use playlink_retry::{RetryError, retry};
use playlink_transport::MediaStream;
use tokio::sync::Mutex;

use crate::{CaptureConfig, CaptureError, CaptureSource, FanoutError, PeerConnectionManager};

/// Owns the host's single outbound stream.
///
/// Starting acquires the stream from the capture source and hands it to
/// the manager, which opens a leg to every current peer and to every
/// peer that joins later. At most one stream is live at a time.
pub struct StreamFanout<C: CaptureSource> {
    capture: C,
    manager: PeerConnectionManager,
    config: CaptureConfig,
    active: Mutex<Option<MediaStream>>,
}

impl<C: CaptureSource> StreamFanout<C> {
    pub fn new(capture: C, manager: PeerConnectionManager, config: CaptureConfig) -> Self {
        Self {
            capture,
            manager,
            config: config.validated(),
            active: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &PeerConnectionManager {
        &self.manager
    }

    /// Captures `surface` and begins sending it to every peer.
    ///
    /// Calling it while a stream is live returns that stream. A surface
    /// that is not rendering yet is retried per the capture policy.
    ///
    /// # Errors
    /// - `CaptureNotReady` if the surface never came up.
    /// - `Capture` if the source failed outright.
    /// - `Peer` if the manager has stopped.
    pub async fn start_streaming(&self, surface: &C::Surface) -> Result<MediaStream, FanoutError> {
        let mut active = self.active.lock().await;
        if let Some(stream) = active.as_ref().filter(|s| !s.is_ended()) {
            return Ok(stream.clone());
        }

        let fps = self.config.fps;
        let stream = retry(
            &self.config.retry,
            "capture",
            |_| self.capture.capture(surface, fps),
            CaptureError::is_not_ready,
        )
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => {
                tracing::error!(attempts, error = %last, "capture surface never became ready");
                FanoutError::CaptureNotReady { attempts }
            }
            RetryError::Aborted { error, .. } => {
                tracing::error!(%error, "capture failed");
                FanoutError::Capture(error)
            }
        })?;

        let legs = match self.manager.attach_stream(stream.clone()).await {
            Ok(legs) => legs,
            Err(error) => {
                stream.stop();
                return Err(error.into());
            }
        };
        tracing::info!(stream_id = stream.id(), fps, legs, "streaming started");
        *active = Some(stream.clone());
        Ok(stream)
    }

    /// Closes every leg and ends the stream. Safe to call when nothing is
    /// streaming.
    pub async fn stop_streaming(&self) {
        let Some(stream) = self.active.lock().await.take() else {
            return;
        };
        let legs = self.manager.detach_stream().await.unwrap_or(0);
        stream.stop();
        tracing::info!(stream_id = stream.id(), legs, "streaming stopped");
    }

    pub async fn is_streaming(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.is_ended())
    }

    pub async fn current_stream(&self) -> Option<MediaStream> {
        self.active.lock().await.clone()
    }
}
