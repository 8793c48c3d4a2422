//! Resilient session listing for Playlink.
//!
//! The lobby sits between the "browse rooms" screen and a flaky directory
//! backend. It never surfaces transient or corrupt-state failures as
//! errors:
//!
//! - every query runs under a deadline,
//! - transient failures are retried with exponential backoff,
//! - corrupt-state failures (and transient ones past the budget) return
//!   an empty listing flagged `degraded` while a background task keeps
//!   probing the directory until it answers again.
//!
//! Listing also sweeps orphaned rooms in the background.

mod config;
mod error;
mod lobby;

pub use config::LobbyConfig;
pub use error::LobbyError;
pub use lobby::{Lobby, LobbyListing, LobbyMode};
