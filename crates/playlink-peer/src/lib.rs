//! Host-side peer layer for Playlink.
//!
//! - [`PeerConnectionManager`] keeps the host's signaling identity alive
//!   across failing servers and owns every [`PeerLinkInfo`]-described link.
//! - [`StreamFanout`] sends one captured stream to every peer, late
//!   joiners included.
//! - [`InputRelay`] hands peer input to a single sink.

mod capture;
mod config;
mod error;
mod fanout;
mod input;
mod link;
pub mod machine;
mod manager;

pub use capture::{CaptureSource, ScriptedCapture};
pub use config::{CaptureConfig, PeerConfig};
pub use error::{CaptureError, FanoutError, PeerError};
pub use fanout::StreamFanout;
pub use input::{InputRelay, InputSink};
pub use link::{DataChannelState, MediaCallState, PeerLinkInfo};
pub use machine::{ConnectionAttemptState, ConnectionMachine, ConnectionState};
pub use manager::{HostEvent, ManagerStatus, PeerConnectionManager};
