//! Best-effort cleanup when a host or player disappears.

use std::sync::Arc;

use playlink_protocol::{PlayerId, SessionId};

use crate::{SessionDirectory, SessionService};

#[derive(Debug, Clone)]
enum Bequest {
    /// Delete the whole session.
    Session,
    /// Take one player out of `players` and the subcollection.
    Seat(PlayerId),
}

/// Cleans up after its owner when dropped, unless disarmed first.
///
/// The host holds a session will ([`LastWill::new`]) for as long as it
/// owns a room; each joined player holds a seat will
/// ([`LastWill::for_player`]). A clean close or leave disarms it; a panic,
/// an early return, or a dropped task lets it fire. The cleanup runs on a
/// spawned task, so it is best effort: if the runtime is already gone,
/// nothing happens and the reaper or the orphan sweep takes over later.
pub struct LastWill<D: SessionDirectory> {
    directory: Arc<D>,
    session_id: SessionId,
    bequest: Bequest,
    armed: bool,
}

impl<D: SessionDirectory> LastWill<D> {
    /// A will that deletes `session_id`.
    pub fn new(directory: Arc<D>, session_id: SessionId) -> Self {
        Self {
            directory,
            session_id,
            bequest: Bequest::Session,
            armed: true,
        }
    }

    /// A will that removes `player_id` from `session_id`, the same way
    /// [`SessionService::leave`] does.
    pub fn for_player(directory: Arc<D>, session_id: SessionId, player_id: PlayerId) -> Self {
        Self {
            directory,
            session_id,
            bequest: Bequest::Seat(player_id),
            armed: true,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The player this will removes, or `None` for a session will.
    pub fn player_id(&self) -> Option<&PlayerId> {
        match &self.bequest {
            Bequest::Session => None,
            Bequest::Seat(player_id) => Some(player_id),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Cancels the will. Call after an explicit close or leave.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<D: SessionDirectory> Drop for LastWill<D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let session_id = self.session_id.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%session_id, "no runtime left, last will skipped");
            return;
        };
        let directory = Arc::clone(&self.directory);
        let bequest = self.bequest.clone();
        runtime.spawn(async move {
            match bequest {
                Bequest::Session => match directory.delete(&session_id).await {
                    Ok(()) => tracing::info!(%session_id, "last will removed abandoned session"),
                    Err(e) => tracing::warn!(%session_id, error = %e, "last will delete failed"),
                },
                Bequest::Seat(player_id) => {
                    let service = SessionService::new(directory);
                    match service.leave(&session_id, &player_id).await {
                        Ok(()) => tracing::info!(
                            %session_id,
                            %player_id,
                            "last will removed disconnected player"
                        ),
                        Err(e) => tracing::warn!(
                            %session_id,
                            %player_id,
                            error = %e,
                            "last will leave failed"
                        ),
                    }
                }
            }
        });
    }
}
