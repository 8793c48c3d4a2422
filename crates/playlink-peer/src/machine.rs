//! The signaling connection state machine.
//!
//! Pure and synchronous: [`ConnectionMachine::handle`] takes a [`Signal`],
//! moves to the next [`ConnectionState`], and returns the [`Action`]s the
//! caller must carry out. No I/O, no timers, no clocks, so every
//! transition is testable on its own.
//!
//! ```text
//!                 start
//! Disconnected ─────────▶ Connecting(0) ──opened──▶ Connected
//!                            │    ▲                   │    ▲
//!               failed, i+1  │    │ timer      invalid│    │reconnected
//!                            ▼    │                   ▼    │
//!                     Connecting(i+1)  CoolingDown   Reconnecting
//!                            │              ▲             │
//!                            └─last failed──┘      bound hit → Connecting(0)
//!                                   │
//!                           cycles exhausted
//!                                   ▼
//!                               Disabled
//! ```
//!
//! `stop` moves any state to `Disconnected`. The circuit stays open across
//! a stop, so a later `start` lands straight in `Disabled`.

use std::time::Duration;

use playlink_protocol::PeerId;
use playlink_retry::Backoff;
use serde::{Deserialize, Serialize};

use crate::PeerConfig;

/// Where the host's signaling connection stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for server `server_index` to acknowledge our identity.
    Connecting { server_index: usize },
    /// Every server failed this cycle; waiting before the next one.
    CoolingDown { cycle: u32 },
    Connected { identity: PeerId, server_index: usize },
    /// The server invalidated our identity; trying to re-register it.
    Reconnecting { attempt: u32 },
    /// The circuit is open. Nothing happens until a manual retry.
    Disabled,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn identity(&self) -> Option<&PeerId> {
        match self {
            Self::Connected { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

/// Failover bookkeeping, owned by one manager and injected into its
/// machine. Nothing about it is global.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAttemptState {
    /// Server currently (or last) tried.
    pub server_index: usize,
    /// Completed failover cycles since the last success.
    pub attempt_count: u32,
    /// Once open, `start` is a no-op.
    pub circuit_open: bool,
    /// Open attempts since the last success.
    pub total_attempts: u32,
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Start,
    /// The current server acknowledged `identity`.
    Opened { identity: PeerId },
    /// The current server could not be reached or refused us.
    OpenFailed,
    /// The cool-down between cycles is over.
    RetryTimerFired,
    /// The server expired our identity or the socket dropped.
    IdentityInvalidated,
    Reconnected { identity: PeerId },
    ReconnectFailed,
    Stop,
    /// Close the circuit and try again.
    ManualRetry,
}

/// Side effects the caller must carry out, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Register with server `server_index`.
    Open { server_index: usize },
    /// Fire [`Signal::RetryTimerFired`] after `delay`.
    ScheduleRetry { delay: Duration },
    /// Re-register the current identity in place.
    Reconnect { attempt: u32 },
    /// Publish the identity.
    IdentityReady(PeerId),
    /// Withdraw the published identity.
    IdentityLost,
    /// Drop the signaling connection, every peer link and anything
    /// pending.
    Release,
    /// The circuit just opened.
    Disable,
}

/// The signaling state machine for one host.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    server_count: usize,
    max_cycles: u32,
    max_reconnects: u32,
    cycle_delay: Backoff,
    state: ConnectionState,
    attempts: ConnectionAttemptState,
}

impl ConnectionMachine {
    pub fn new(config: &PeerConfig) -> Self {
        Self::with_attempts(config, ConnectionAttemptState::default())
    }

    /// A machine starting from existing failover bookkeeping, e.g. with
    /// the circuit already open.
    pub fn with_attempts(config: &PeerConfig, attempts: ConnectionAttemptState) -> Self {
        Self {
            server_count: config.servers.len(),
            max_cycles: config.max_cycles.max(1),
            max_reconnects: config.max_reconnects,
            cycle_delay: config.cycle_delay,
            state: ConnectionState::Disconnected,
            attempts,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn attempts(&self) -> &ConnectionAttemptState {
        &self.attempts
    }

    /// Applies `signal` and returns what to do. Signals that make no
    /// sense in the current state are ignored.
    pub fn handle(&mut self, signal: Signal) -> Vec<Action> {
        match (signal, &self.state) {
            (Signal::Stop, ConnectionState::Disconnected) => Vec::new(),
            (Signal::Stop, ConnectionState::Disabled) => {
                self.state = ConnectionState::Disconnected;
                Vec::new()
            }
            (Signal::Stop, state) => {
                let had_identity = matches!(
                    state,
                    ConnectionState::Connected { .. } | ConnectionState::Reconnecting { .. }
                );
                self.state = ConnectionState::Disconnected;
                if had_identity {
                    vec![Action::IdentityLost, Action::Release]
                } else {
                    vec![Action::Release]
                }
            }

            (Signal::Start, ConnectionState::Disconnected) => {
                if self.attempts.circuit_open {
                    self.state = ConnectionState::Disabled;
                    return Vec::new();
                }
                self.attempts.total_attempts = 0;
                self.begin_cycle()
            }
            (Signal::Start, _) => Vec::new(),

            (Signal::ManualRetry, state) => {
                let was_disabled = *state == ConnectionState::Disabled;
                self.attempts.circuit_open = false;
                self.attempts.attempt_count = 0;
                self.attempts.total_attempts = 0;
                if was_disabled {
                    self.begin_cycle()
                } else {
                    Vec::new()
                }
            }

            (Signal::Opened { identity }, ConnectionState::Connecting { server_index }) => {
                let server_index = *server_index;
                self.attempts.attempt_count = 0;
                self.attempts.total_attempts = 0;
                self.state = ConnectionState::Connected {
                    identity: identity.clone(),
                    server_index,
                };
                vec![Action::IdentityReady(identity)]
            }

            (Signal::OpenFailed, ConnectionState::Connecting { server_index }) => {
                let next = server_index + 1;
                if next < self.server_count {
                    return self.open(next);
                }
                self.attempts.attempt_count += 1;
                if self.attempts.attempt_count >= self.max_cycles {
                    self.attempts.circuit_open = true;
                    self.state = ConnectionState::Disabled;
                    return vec![Action::Disable];
                }
                let cycle = self.attempts.attempt_count;
                self.state = ConnectionState::CoolingDown { cycle };
                vec![Action::ScheduleRetry {
                    delay: self.cycle_delay.delay(cycle - 1),
                }]
            }

            (Signal::RetryTimerFired, ConnectionState::CoolingDown { .. }) => self.open(0),

            (Signal::IdentityInvalidated, ConnectionState::Connected { .. }) => {
                if self.max_reconnects == 0 {
                    let mut actions = vec![Action::IdentityLost, Action::Release];
                    actions.extend(self.open(0));
                    return actions;
                }
                self.state = ConnectionState::Reconnecting { attempt: 1 };
                vec![Action::IdentityLost, Action::Reconnect { attempt: 1 }]
            }

            (Signal::Reconnected { identity }, ConnectionState::Reconnecting { .. }) => {
                self.state = ConnectionState::Connected {
                    identity: identity.clone(),
                    server_index: self.attempts.server_index,
                };
                vec![Action::IdentityReady(identity)]
            }

            (Signal::ReconnectFailed, ConnectionState::Reconnecting { attempt }) => {
                let attempt = *attempt;
                if attempt < self.max_reconnects {
                    self.state = ConnectionState::Reconnecting {
                        attempt: attempt + 1,
                    };
                    return vec![Action::Reconnect {
                        attempt: attempt + 1,
                    }];
                }
                let mut actions = vec![Action::Release];
                actions.extend(self.open(0));
                actions
            }

            _ => Vec::new(),
        }
    }

    fn begin_cycle(&mut self) -> Vec<Action> {
        if self.server_count == 0 {
            self.attempts.circuit_open = true;
            self.state = ConnectionState::Disabled;
            return vec![Action::Disable];
        }
        self.open(0)
    }

    fn open(&mut self, server_index: usize) -> Vec<Action> {
        self.attempts.server_index = server_index;
        self.attempts.total_attempts += 1;
        self.state = ConnectionState::Connecting { server_index };
        vec![Action::Open { server_index }]
    }
}
