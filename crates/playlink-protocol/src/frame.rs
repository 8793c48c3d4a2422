//! Frames exchanged with a signaling relay over a WebSocket.
//!
//! The relay knows each client by its registered [`PeerId`] and forwards
//! frames between them. In frames sent by a client, `peer` names the
//! destination; in frames delivered by the relay, `peer` names the
//! source.
//!
//! ```text
//! host                        relay                        peer
//!  │── REGISTER {id} ───────────→│                            │
//!  │←──────────── REGISTERED {id}│                            │
//!  │←──────────── INCOMING {peer}│←──── (peer connects) ──────│
//!  │←──── DATA {peer, payload} ──│←─────── DATA ──────────────│
//!  │── CALL / MEDIA / HANGUP ───→│──────────────────────────→ │
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::PeerId;

/// One encoded video frame of a live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFrame {
    /// Monotonic per-stream sequence number.
    pub seq: u64,
    /// Capture time in milliseconds.
    pub timestamp_ms: u64,
    pub data: Bytes,
}

/// Relay protocol frame, internally tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayFrame {
    // -- Identity --
    /// Client asks to be known as `id`.
    Register { id: PeerId },
    /// Relay confirms the identity it assigned.
    Registered { id: PeerId },
    /// The requested id is already registered.
    IdTaken { id: PeerId },
    /// Relay-level failure; the client should try another server.
    Error { message: String },
    /// The registered identity is no longer valid.
    Expire,
    /// Keep-alive from the client.
    Heartbeat,

    // -- Peer links --
    /// A remote peer opened a data connection to us.
    Incoming { peer: PeerId },
    /// Application payload on the reliable data channel.
    Data {
        peer: PeerId,
        payload: serde_json::Value,
    },
    /// Start of a media leg.
    Call { peer: PeerId, call_id: u64 },
    /// One frame on a media leg.
    Media {
        peer: PeerId,
        call_id: u64,
        frame: MediaFrame,
    },
    /// End of a media leg.
    Hangup { peer: PeerId, call_id: u64 },
    /// Data connection closed, by either side.
    Leave { peer: PeerId },
    /// A single peer link failed.
    PeerError { peer: PeerId, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_tag_is_screaming_snake_case() {
        let frame = RelayFrame::IdTaken { id: PeerId::from("x") };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ID_TAKEN");
        assert_eq!(json["id"], "x");
    }

    #[test]
    fn test_unit_frames_decode_from_type_only() {
        let frame: RelayFrame = serde_json::from_str(r#"{"type":"EXPIRE"}"#).unwrap();
        assert_eq!(frame, RelayFrame::Expire);
    }

    #[test]
    fn test_data_frame_carries_arbitrary_payload() {
        let json = r#"{"type":"DATA","peer":"p1","payload":{"kind":"press","code":"KeyA","key":"a","timestampMs":5}}"#;
        let frame: RelayFrame = serde_json::from_str(json).unwrap();
        match frame {
            RelayFrame::Data { peer, payload } => {
                assert_eq!(peer.as_str(), "p1");
                assert_eq!(payload["code"], "KeyA");
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }
}
