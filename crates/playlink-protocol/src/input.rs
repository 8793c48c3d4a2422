//! Input events carried from a peer to the host.

use serde::{Deserialize, Serialize};

/// Whether a control went down or came up.
///
/// Older clients send browser event names (`keydown`/`keyup`); both
/// spellings decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[serde(alias = "keydown")]
    Press,
    #[serde(alias = "keyup")]
    Release,
}

/// A single discrete input from a peer.
///
/// Immutable once produced; the host's input sink consumes each event
/// exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    #[serde(alias = "type")]
    pub kind: InputKind,
    /// Physical key code, e.g. `"KeyZ"`.
    pub code: String,
    /// Logical key, e.g. `"z"`.
    pub key: String,
    /// Sender-side timestamp in milliseconds.
    #[serde(alias = "timestamp")]
    pub timestamp_ms: u64,
}

impl InputEvent {
    pub fn new(
        kind: InputKind,
        code: impl Into<String>,
        key: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            key: key.into(),
            timestamp_ms,
        }
    }
}
