//! Input relay: peer input events to a single host-side sink.

use playlink_protocol::{InputEvent, PeerId};

/// Where peer input ends up, typically the emulator adapter.
///
/// Closures of the right shape are sinks.
pub trait InputSink: Send + 'static {
    fn deliver(&mut self, peer: &PeerId, event: InputEvent);
}

impl<F> InputSink for F
where
    F: FnMut(&PeerId, InputEvent) + Send + 'static,
{
    fn deliver(&mut self, peer: &PeerId, event: InputEvent) {
        self(peer, event)
    }
}

impl InputSink for Box<dyn InputSink> {
    fn deliver(&mut self, peer: &PeerId, event: InputEvent) {
        (**self).deliver(peer, event)
    }
}

/// Hands each decoded event to exactly one sink, in arrival order.
///
/// Events that arrive before a sink is registered are dropped, never
/// buffered.
#[derive(Default)]
pub struct InputRelay {
    sink: Option<Box<dyn InputSink>>,
    delivered: u64,
    dropped: u64,
}

impl InputRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `sink`, replacing any previous one.
    pub fn set_sink(&mut self, sink: impl InputSink) {
        if self.sink.replace(Box::new(sink)).is_some() {
            tracing::debug!("input sink replaced");
        }
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Returns `true` if a sink took the event.
    pub fn relay(&mut self, peer: &PeerId, event: InputEvent) -> bool {
        match self.sink.as_mut() {
            Some(sink) => {
                sink.deliver(peer, event);
                self.delivered += 1;
                true
            }
            None => {
                self.dropped += 1;
                tracing::warn!(%peer, code = %event.code, "input dropped, no sink registered");
                false
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
