//! # Playlink
//!
//! Retro game streaming and co-play core.
//!
//! A host creates a room in a shared session directory, obtains an
//! identity on a signaling relay, and streams its emulator output to every
//! peer that connects; peers send controller input back. Around that sit a
//! reaper that deletes rooms left empty and a lobby that lists joinable
//! rooms and degrades gracefully when the directory misbehaves.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use playlink::prelude::*;
//!
//! # async fn run() -> Result<(), PlaylinkError> {
//! playlink::telemetry::init();
//! let directory = Arc::new(InMemoryDirectory::new());
//! let host = HostSession::create(
//!     Arc::clone(&directory),
//!     MemoryRelay::new(),
//!     ScriptedCapture::ready(),
//!     PlaylinkConfig::default(),
//!     NewSession {
//!         host_id: PlayerId::from("host"),
//!         host_display_name: "Host".into(),
//!         game_id: "smb3".into(),
//!         game_title: "Super Mario Bros. 3".into(),
//!         platform: "nes".into(),
//!         visibility: Visibility::Public,
//!         max_players: 4,
//!     },
//! )
//! .await?;
//! host.start_streaming("canvas").await?;
//! host.close().await
//! # }
//! ```

pub mod config;
mod error;
mod host;
pub mod telemetry;

pub use config::{PlaylinkConfig, PublishConfig};
pub use error::PlaylinkError;
pub use host::HostSession;

pub use playlink_directory as directory;
pub use playlink_lobby as lobby;
pub use playlink_peer as peer;
pub use playlink_protocol as protocol;
pub use playlink_retry as retry;
pub use playlink_room as room;
pub use playlink_transport as transport;

pub mod prelude {
    pub use crate::{HostSession, PlaylinkConfig, PlaylinkError};
    pub use playlink_directory::{
        InMemoryDirectory, NewSession, SessionDirectory, SessionFilter, SessionService,
    };
    pub use playlink_lobby::{Lobby, LobbyConfig, LobbyListing, LobbyMode};
    pub use playlink_peer::{
        CaptureSource, HostEvent, ManagerStatus, PeerConnectionManager, ScriptedCapture,
        StreamFanout,
    };
    pub use playlink_protocol::{
        InputEvent, InputKind, PeerId, PlayerId, SessionId, SessionRecord, SessionStatus,
        Visibility,
    };
    pub use playlink_room::{ReaperConfig, ReaperEvent};
    pub use playlink_transport::{MediaStream, MemoryRelay, SignalingServer};
}
