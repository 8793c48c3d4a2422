//! Session directory for Playlink.
//!
//! The directory is a remote, replicated document store holding one
//! [`SessionRecord`](playlink_protocol::SessionRecord) per room plus a
//! `players` subcollection. This crate provides:
//!
//! 1. **The boundary**: the [`SessionDirectory`] trait, a thin typed
//!    wrapper every other component is written against.
//! 2. **A fake**: [`InMemoryDirectory`], with live subscriptions, call
//!    counters and fault injection.
//! 3. **Membership rules**: [`SessionService`] (create, join, leave,
//!    status changes, close, host promotion) on top of any directory.
//! 4. **Last-will cleanup**: [`LastWill`] deletes a room when its host
//!    goes away without closing it, or frees a player's seat when that
//!    player disconnects without leaving.
//!
//! ```text
//! Lobby / Reaper / Host (above)  ← read, watch and mutate sessions
//!     ↕
//! SessionService (this crate)    ← who may change what
//!     ↕
//! SessionDirectory (this crate)  ← typed document store boundary
//! ```

mod directory;
mod error;
mod memory;
mod patch;
mod service;
mod will;

pub use directory::{SessionDirectory, Snapshot, Subscription};
pub use error::{BackendCode, DirectoryError};
pub use memory::{DirectoryOp, InMemoryDirectory};
pub use patch::{SessionFilter, SessionPatch};
pub use service::{NewSession, SessionService};
pub use will::LastWill;
