//! One configuration document for every component.

use std::time::Duration;

use playlink_lobby::LobbyConfig;
use playlink_peer::{CaptureConfig, PeerConfig};
use playlink_retry::{Backoff, RetryPolicy};
use playlink_room::ReaperConfig;
use serde::{Deserialize, Serialize};

use crate::PlaylinkError;

/// Aggregated settings. Every field is optional in JSON; missing ones
/// take their defaults.
///
/// ```
/// let config = playlink::PlaylinkConfig::from_json(r#"{"reaper": {"grace": {"secs": 20, "nanos": 0}}}"#)
///     .unwrap();
/// assert_eq!(config.reaper.grace.as_secs(), 20);
/// assert_eq!(config.capture.fps, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylinkConfig {
    pub peer: PeerConfig,
    pub capture: CaptureConfig,
    pub reaper: ReaperConfig,
    pub lobby: LobbyConfig,
    /// Retries for writing the host's signaling id to the directory.
    pub publish: PublishConfig,
}

/// How hard the host tries to publish its signaling identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub retry: RetryPolicy,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(
                Backoff::exponential(Duration::from_millis(500), 2.0, Duration::from_secs(5)),
                4,
            ),
        }
    }
}

impl PlaylinkConfig {
    /// Parses a JSON document and validates it.
    ///
    /// # Errors
    /// `Config` if the document is not valid JSON or has mistyped fields.
    pub fn from_json(json: &str) -> Result<Self, PlaylinkError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    /// Clamps every section.
    pub fn validated(self) -> Self {
        Self {
            peer: self.peer.validated(),
            capture: self.capture.validated(),
            reaper: self.reaper.validated(),
            lobby: self.lobby.validated(),
            publish: PublishConfig {
                retry: self.publish.retry.validated(),
            },
        }
    }
}
