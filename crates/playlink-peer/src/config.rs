//! Signaling and capture configuration.

use std::time::Duration;

use playlink_retry::{Backoff, RetryPolicy};
use playlink_transport::SignalingServer;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// PeerConfig
// ---------------------------------------------------------------------------

/// How the host obtains and keeps a signaling identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Tried in order; a failing server fails over to the next one at once.
    pub servers: Vec<SignalingServer>,

    /// Wait before restarting from the first server once the whole list
    /// has failed. The attempt number is the count of completed cycles
    /// minus one.
    pub cycle_delay: Backoff,

    /// Full passes over `servers` before the circuit opens. The manager
    /// never makes more than `servers.len() * max_cycles` open attempts in
    /// a row without success.
    pub max_cycles: u32,

    /// In-place reconnects after the server invalidates our identity,
    /// before starting over from the first server.
    pub max_reconnects: u32,

    /// Command channel capacity for the manager actor.
    pub channel_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            servers: SignalingServer::public_default(),
            cycle_delay: Backoff::fixed(Duration::from_secs(8)),
            max_cycles: 2,
            max_reconnects: 3,
            channel_size: 64,
        }
    }
}

impl PeerConfig {
    pub fn with_servers(servers: Vec<SignalingServer>) -> Self {
        Self {
            servers,
            ..Self::default()
        }
    }

    /// Clamp and fix any out-of-range values.
    ///
    /// - An empty server list falls back to the public default.
    /// - `max_cycles` is at least 1.
    /// - `channel_size` is at least 1.
    pub fn validated(mut self) -> Self {
        if self.servers.is_empty() {
            warn!("no signaling servers configured, using the public default");
            self.servers = SignalingServer::public_default();
        }
        if self.max_cycles == 0 {
            warn!("max_cycles of 0 would never connect, using 1");
            self.max_cycles = 1;
        }
        if self.channel_size == 0 {
            self.channel_size = 1;
        }
        self.cycle_delay = self.cycle_delay.validated();
        self
    }
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Capture acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target frame rate of the outbound stream.
    pub fps: u32,

    /// Bound on waiting for the rendering surface to come up.
    pub retry: RetryPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            retry: RetryPolicy::new(
                Backoff::exponential(Duration::from_millis(100), 2.0, Duration::from_secs(2)),
                8,
            ),
        }
    }
}

impl CaptureConfig {
    pub const MAX_FPS: u32 = 120;

    pub fn validated(mut self) -> Self {
        if self.fps == 0 || self.fps > Self::MAX_FPS {
            let fps = self.fps.clamp(1, Self::MAX_FPS);
            warn!(requested = self.fps, fps, "capture fps out of range, clamping");
            self.fps = fps;
        }
        self.retry = self.retry.validated();
        self
    }
}
