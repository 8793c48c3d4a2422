//! Room lifecycle management for Playlink.
//!
//! Keeps session records from outliving their rooms. Two independent
//! policies apply, and both may hit the same room since deletes are
//! idempotent:
//!
//! - **Empty-room grace period**: a per-session actor watches the
//!   membership list. When it drops to zero a timer starts; if nobody
//!   rejoins before it fires, the record is deleted.
//! - **Orphan sweep**: rooms with no players that are older than a
//!   timeout get deleted in the background while the lobby lists them.
//!
//! # Key types
//!
//! - [`spawn_reaper`] starts the grace-period actor for one session
//! - [`ReaperHandle`] queries or stops a running reaper
//! - [`ReaperEvent`] tells the host why its room went away
//! - [`partition_orphans`] / [`spawn_orphan_sweep`] implement the sweep

mod config;
mod error;
mod orphan;
mod reaper;

pub use config::{ReaperConfig, ReaperState};
pub use error::ReaperError;
pub use orphan::{is_orphaned, partition_orphans, spawn_orphan_sweep};
pub use reaper::{ReaperEvent, ReaperHandle, ReaperStatus, spawn_reaper};
