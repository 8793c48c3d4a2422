//! Per-peer link state held by the connection manager.

use playlink_protocol::PeerId;
use playlink_transport::CallHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCallState {
    /// No stream has been sent on this link.
    None,
    Sending,
    Closed,
}

/// A read-only view of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLinkInfo {
    pub peer: PeerId,
    pub data: DataChannelState,
    pub media: MediaCallState,
}

/// One connected remote participant. Owned by the manager actor; never
/// shared.
pub(crate) struct PeerLink {
    peer: PeerId,
    data: DataChannelState,
    media: MediaCallState,
    call: Option<CallHandle>,
}

impl PeerLink {
    /// A link whose data channel the relay reported open.
    pub(crate) fn open(peer: PeerId) -> Self {
        Self {
            peer,
            data: DataChannelState::Open,
            media: MediaCallState::None,
            call: None,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.data == DataChannelState::Open
    }

    pub(crate) fn start_call(&mut self, call: CallHandle) {
        self.end_call();
        self.call = Some(call);
        self.media = MediaCallState::Sending;
    }

    /// Marks the media leg failed without a handle to close.
    pub(crate) fn call_failed(&mut self) {
        self.media = MediaCallState::Closed;
    }

    /// Closes the media leg, if any. Returns `true` if one was open.
    pub(crate) fn end_call(&mut self) -> bool {
        match self.call.take() {
            Some(mut call) => {
                call.close();
                self.media = MediaCallState::Closed;
                true
            }
            None => false,
        }
    }

    pub(crate) fn close(&mut self) {
        self.end_call();
        self.data = DataChannelState::Closed;
    }

    pub(crate) fn info(&self) -> PeerLinkInfo {
        PeerLinkInfo {
            peer: self.peer.clone(),
            data: self.data,
            media: self.media,
        }
    }
}
