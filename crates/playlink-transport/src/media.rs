//! Live media streams and the per-peer legs that carry them.
//!
//! A [`MediaStream`] has one producer (the capture source) and any number
//! of consumers. Each consumer is a [`CallHandle`]: a task that forwards
//! every frame to one remote peer until the leg is closed or the stream
//! ends.
//!
//! ```text
//!                    ┌─→ CallHandle (peer A) ─→ relay
//! capture ─→ stream ─┼─→ CallHandle (peer B) ─→ relay
//!                    └─→ CallHandle (peer C, joined late) ─→ relay
//! ```
//!
//! Frames are fanned out through a `broadcast` channel, so a slow leg
//! lags and skips frames instead of stalling the others.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use playlink_protocol::{MediaFrame, PeerId};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

/// Frames buffered per leg before a slow leg starts skipping.
const FRAME_BUFFER: usize = 120;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// MediaStream
// ---------------------------------------------------------------------------

/// A continuous outbound media stream. Cheap to clone; all clones refer to
/// the same stream.
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: u64,
    fps: u32,
    frames: broadcast::Sender<MediaFrame>,
    ended: watch::Sender<bool>,
    next_seq: AtomicU64,
}

impl MediaStream {
    /// Creates a live stream targeting `fps` frames per second.
    pub fn new(fps: u32) -> Self {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(StreamInner {
                id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
                fps,
                frames,
                ended,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Process-unique id, handy in logs.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn fps(&self) -> u32 {
        self.inner.fps
    }

    /// Publishes one frame to every open leg. Returns the frame's sequence
    /// number, or `None` once the stream has ended.
    pub fn push(&self, data: Bytes, timestamp_ms: u64) -> Option<u64> {
        if self.is_ended() {
            return None;
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        // No receivers just means nobody is watching yet.
        let _ = self.inner.frames.send(MediaFrame {
            seq,
            timestamp_ms,
            data,
        });
        Some(seq)
    }

    /// Opens a new consumer positioned at the live edge.
    pub fn subscribe(&self) -> MediaSubscription {
        MediaSubscription {
            frames: self.inner.frames.subscribe(),
            ended: self.inner.ended.subscribe(),
        }
    }

    /// Ends the stream. Every leg finishes after draining what it already
    /// received. Returns `true` only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        self.inner.ended.send_if_modified(|ended| {
            if *ended {
                false
            } else {
                *ended = true;
                true
            }
        })
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Number of consumers currently attached.
    pub fn consumer_count(&self) -> usize {
        self.inner.frames.receiver_count()
    }

    /// Returns `true` if both handles refer to the same stream.
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("fps", &self.inner.fps)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// One consumer's view of a [`MediaStream`].
pub struct MediaSubscription {
    frames: broadcast::Receiver<MediaFrame>,
    ended: watch::Receiver<bool>,
}

impl MediaSubscription {
    /// Waits for the next frame. Returns `None` when the stream ends.
    pub async fn next(&mut self) -> Option<MediaFrame> {
        loop {
            tokio::select! {
                biased;
                frame = self.frames.recv() => match frame {
                    Ok(frame) => return Some(frame),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "media consumer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = self.ended.wait_for(|ended| *ended) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CallHandle
// ---------------------------------------------------------------------------

/// An outbound media leg to a single peer.
///
/// Dropping the handle closes the leg.
pub struct CallHandle {
    peer: PeerId,
    call_id: u64,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CallHandle {
    /// Spawns a forwarding task for `stream`.
    ///
    /// `forward` is called for every frame and returns `false` if the leg
    /// is broken, which ends the task. `on_end` runs once when the leg
    /// finishes for any reason.
    pub fn spawn<F, E>(
        peer: PeerId,
        call_id: u64,
        stream: &MediaStream,
        mut forward: F,
        on_end: E,
    ) -> Self
    where
        F: FnMut(MediaFrame) -> bool + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let mut frames = stream.subscribe();
        let leg_peer = peer.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    frame = frames.next() => match frame {
                        Some(frame) => {
                            if !forward(frame) {
                                tracing::debug!(peer = %leg_peer, call_id, "media leg broken");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            on_end();
        });

        Self {
            peer,
            call_id,
            stop: Some(stop_tx),
            task,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Closes the leg. Returns `true` the first time.
    pub fn close(&mut self) -> bool {
        match self.stop.take() {
            Some(stop) => {
                let _ = stop.send(());
                true
            }
            None => false,
        }
    }

    /// Returns `true` once the forwarding task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("peer", &self.peer)
            .field("call_id", &self.call_id)
            .field("open", &self.stop.is_some())
            .finish()
    }
}
