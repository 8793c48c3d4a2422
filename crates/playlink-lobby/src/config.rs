//! Lobby configuration.

use std::time::Duration;

use playlink_retry::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Deadline for a single directory query. An expired query counts as
    /// a transient failure.
    pub query_timeout: Duration,

    /// Backoff and budget for transient failures.
    pub retry: RetryPolicy,

    /// Wait between background recovery queries while degraded.
    pub degraded_cooldown: Duration,

    /// Empty rooms older than this are swept while listing.
    pub orphan_timeout: Duration,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            retry: RetryPolicy::new(
                Backoff::exponential(
                    Duration::from_millis(1_500),
                    1.8,
                    Duration::from_secs(30),
                ),
                3,
            ),
            degraded_cooldown: Duration::from_secs(5),
            orphan_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl LobbyConfig {
    /// Floor for `query_timeout` and `degraded_cooldown`.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

    /// Clamp and fix any out-of-range values.
    pub fn validated(mut self) -> Self {
        if self.query_timeout < Self::MIN_INTERVAL {
            warn!(query_timeout = ?self.query_timeout, "query_timeout too small, clamping");
            self.query_timeout = Self::MIN_INTERVAL;
        }
        if self.degraded_cooldown < Self::MIN_INTERVAL {
            warn!(
                degraded_cooldown = ?self.degraded_cooldown,
                "degraded_cooldown too small, clamping"
            );
            self.degraded_cooldown = Self::MIN_INTERVAL;
        }
        self.retry = self.retry.validated();
        self
    }
}
