//! Reaper configuration and state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// ReaperConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// How long an emptied room may stay empty before it is deleted.
    pub grace: Duration,

    /// Wait before re-checking a room when the directory could not be
    /// read or written at expiry.
    pub recheck_delay: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            recheck_delay: Duration::from_secs(1),
        }
    }
}

impl ReaperConfig {
    /// Lower bound for `recheck_delay`, so a broken directory is not
    /// hammered in a tight loop.
    pub const MIN_RECHECK_DELAY: Duration = Duration::from_millis(100);

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            grace,
            ..Self::default()
        }
    }

    /// Clamp and fix any out-of-range values.
    pub fn validated(mut self) -> Self {
        if self.recheck_delay < Self::MIN_RECHECK_DELAY {
            warn!(
                recheck_delay = ?self.recheck_delay,
                min = ?Self::MIN_RECHECK_DELAY,
                "recheck_delay too small, clamping"
            );
            self.recheck_delay = Self::MIN_RECHECK_DELAY;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// ReaperState
// ---------------------------------------------------------------------------

/// Where a reaper is in its lifecycle.
///
/// ```text
/// Idle ──first player──▶ Occupied ──last player leaves──▶ GracePeriod
///                           ▲                                │    │
///                           └──────── player rejoins ────────┘    │
///                                                          timer fires
///                                                                 ▼
///                                                              Closed
/// ```
///
/// `Gone` is reachable from any state when the record disappears for a
/// reason other than the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaperState {
    /// Nobody has joined yet. A fresh empty room is left to the orphan
    /// sweep.
    Idle,
    /// At least one player is present.
    Occupied,
    /// The room emptied and the grace timer is running.
    GracePeriod,
    /// The reaper deleted the room.
    Closed,
    /// The room was deleted by someone else.
    Gone,
}

impl ReaperState {
    /// Returns `true` once the reaper has nothing left to watch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Gone)
    }
}

impl std::fmt::Display for ReaperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Occupied => write!(f, "Occupied"),
            Self::GracePeriod => write!(f, "GracePeriod"),
            Self::Closed => write!(f, "Closed"),
            Self::Gone => write!(f, "Gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaper_config_default() {
        let config = ReaperConfig::default();
        assert_eq!(config.grace, Duration::from_secs(10));
        assert_eq!(config.recheck_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_validated_clamps_recheck_delay() {
        let config = ReaperConfig {
            grace: Duration::ZERO,
            recheck_delay: Duration::ZERO,
        }
        .validated();
        assert_eq!(config.recheck_delay, ReaperConfig::MIN_RECHECK_DELAY);
        assert_eq!(config.grace, Duration::ZERO);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ReaperConfig =
            serde_json::from_str(r#"{"grace":{"secs":3,"nanos":0}}"#).unwrap();
        assert_eq!(config.grace, Duration::from_secs(3));
        assert_eq!(config.recheck_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_reaper_state_is_terminal() {
        assert!(!ReaperState::Idle.is_terminal());
        assert!(!ReaperState::GracePeriod.is_terminal());
        assert!(ReaperState::Closed.is_terminal());
        assert!(ReaperState::Gone.is_terminal());
        assert_eq!(ReaperState::GracePeriod.to_string(), "GracePeriod");
    }
}
