//! Sync status state machine for feedsync.
//!
//! This module provides a pure, side-effect-free state machine for the
//! engine's externally visible health: `offline`, `syncing`, `synced` or
//! `error`. The machine takes events as input and produces a new machine
//! plus a list of actions to execute.
//!
//! The actual I/O (opening the endpoint, pushing snapshots, running timers)
//! is performed by sync-client, not by this module.

use std::time::Duration;

/// Fixed interval between attempts to reopen a failed self endpoint.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Interval of the periodic push to every open session.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Grace period after a push before reporting `synced`.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Process-wide sync health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No connectivity, or the engine is torn down.
    Offline,
    /// A push is in flight.
    Syncing,
    /// The endpoint is open and the last push has settled.
    Synced,
    /// The self endpoint failed; a retry is pending.
    Error,
}

impl SyncState {
    /// Lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Offline => "offline",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
            SyncState::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMachine {
    state: SyncState,
    online: bool,
    endpoint_open: bool,
}

impl SyncMachine {
    /// Create a machine in the `Offline` state with the given connectivity.
    pub fn new(online: bool) -> Self {
        Self {
            state: SyncState::Offline,
            online,
            endpoint_open: false,
        }
    }

    /// Process an event and return the new machine plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match event {
            Event::Start { authenticated } => {
                if !authenticated {
                    return (self, vec![Action::Warn("not authenticated".into())]);
                }
                if !self.online {
                    return (self, vec![]);
                }
                (self, vec![Action::StartConnections, Action::StartTicker])
            }

            Event::ConnectivityChanged {
                online: true,
                authenticated,
            } => {
                let next = Self {
                    online: true,
                    ..self
                };
                if !authenticated {
                    return (next, vec![]);
                }
                next.transition(
                    SyncState::Syncing,
                    vec![Action::StartConnections, Action::StartTicker],
                )
            }

            Event::ConnectivityChanged { online: false, .. } => {
                let next = Self {
                    online: false,
                    endpoint_open: false,
                    ..self
                };
                next.transition(
                    SyncState::Offline,
                    vec![Action::StopTicker, Action::StopConnections],
                )
            }

            Event::EndpointOpened if self.online => {
                let next = Self {
                    endpoint_open: true,
                    ..self
                };
                next.transition(SyncState::Synced, vec![])
            }

            Event::EndpointFailed if self.online => {
                let next = Self {
                    endpoint_open: false,
                    ..self
                };
                next.transition(SyncState::Error, vec![])
            }

            Event::Tick { open_sessions } if self.online && open_sessions > 0 => self.transition(
                SyncState::Syncing,
                vec![Action::PushToAll, Action::StartSettleTimer],
            ),

            Event::SyncRequested { open_sessions } => {
                // Endpoint not open right now: never opened yet, or retrying
                if !self.online || !self.endpoint_open {
                    return (
                        self,
                        vec![Action::Warn("offline or endpoint not open".into())],
                    );
                }
                let mut actions = Vec::with_capacity(3);
                if open_sessions == 0 {
                    actions.push(Action::ConnectKnownPeers);
                }
                actions.push(Action::PushToAll);
                actions.push(Action::StartSettleTimer);
                self.transition(SyncState::Syncing, actions)
            }

            Event::SettleElapsed if self.online => self.transition(SyncState::Synced, vec![]),

            Event::Shutdown => {
                let next = Self {
                    endpoint_open: false,
                    ..self
                };
                next.transition(
                    SyncState::Offline,
                    vec![Action::StopTicker, Action::StopConnections],
                )
            }

            // Events that do not apply in the current state
            _ => (self, vec![]),
        }
    }

    /// Enter `state`, emitting it ahead of `actions`.
    fn transition(self, state: SyncState, mut actions: Vec<Action>) -> (Self, Vec<Action>) {
        actions.insert(0, Action::EmitStatus(state));
        (Self { state, ..self }, actions)
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Whether connectivity is currently available.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Whether the self endpoint is open.
    pub fn is_endpoint_open(&self) -> bool {
        self.endpoint_open
    }
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Events that drive the status machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The application called `init()`.
    Start {
        /// Whether a user is signed in.
        authenticated: bool,
    },
    /// The connectivity signal changed.
    ConnectivityChanged {
        /// New connectivity.
        online: bool,
        /// Whether a user is signed in.
        authenticated: bool,
    },
    /// The self endpoint opened.
    EndpointOpened,
    /// The self endpoint failed to open or died.
    EndpointFailed,
    /// The periodic sync timer fired.
    Tick {
        /// Sessions open at the time of the tick.
        open_sessions: usize,
    },
    /// The application called `syncNow()`.
    SyncRequested {
        /// Sessions open at the time of the request.
        open_sessions: usize,
    },
    /// The settle timer fired.
    SettleElapsed,
    /// The application called `destroy()`.
    Shutdown,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Publish a status change to subscribers.
    EmitStatus(SyncState),
    /// Start the connection manager.
    StartConnections,
    /// Close every session and the self endpoint, cancel retries.
    StopConnections,
    /// Start the periodic sync timer.
    StartTicker,
    /// Cancel the periodic sync timer.
    StopTicker,
    /// Dial every fresh directory entry.
    ConnectKnownPeers,
    /// Push snapshots to every open session.
    PushToAll,
    /// Report `synced` after the settle delay.
    StartSettleTimer,
    /// Emit a warning; the request was ignored.
    Warn(String),
}
