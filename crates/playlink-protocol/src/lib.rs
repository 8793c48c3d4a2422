//! Wire and data model for Playlink.
//!
//! Everything that crosses a process boundary lives here:
//!
//! - **Identifiers** ([`SessionId`], [`PlayerId`], [`PeerId`]).
//! - **Directory documents** ([`SessionRecord`], [`PlayerRecord`]) as they
//!   are stored in the shared session directory.
//! - **Input** ([`InputEvent`]) carried from a peer to the host.
//! - **Relay frames** ([`RelayFrame`]) spoken with a signaling relay.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]).
//!
//! ```text
//! Directory documents ─┐
//! Input events ────────┼─→ Codec (bytes) → transport
//! Relay frames ────────┘
//! ```

mod codec;
mod error;
mod frame;
mod input;
mod session;
mod types;

pub mod code;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frame::{MediaFrame, RelayFrame};
pub use input::{InputEvent, InputKind};
pub use session::{PlayerRecord, SessionRecord};
pub use types::{PeerId, PlayerId, SessionId, SessionStatus, Visibility};
