//! Shared holder of the sync status machine.
//!
//! Both the orchestrator and the connection manager feed events into the
//! same [`SyncMachine`]. [`StatusTracker::apply`] performs the actions that
//! only concern status (publishing changes, warnings) and hands the rest
//! back to the caller.

use crate::events::{EventBus, SyncEvent};
use feedsync_core::{Action, Event, SyncMachine, SyncState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Thread-safe wrapper around [`SyncMachine`] that publishes status changes.
#[derive(Clone, Debug)]
pub struct StatusTracker {
    machine: Arc<Mutex<SyncMachine>>,
    bus: EventBus,
}

impl StatusTracker {
    /// Create a tracker in the `offline` state.
    pub fn new(online: bool, bus: EventBus) -> Self {
        Self {
            machine: Arc::new(Mutex::new(SyncMachine::new(online))),
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed `event` to the machine.
    ///
    /// Status changes are published and warnings logged before returning;
    /// the remaining actions are returned in order for the caller to run.
    pub fn apply(&self, event: Event) -> Vec<Action> {
        let actions = {
            let mut machine = self.lock();
            let (next, actions) = machine.on_event(event);
            *machine = next;
            actions
        };

        // Publish outside the lock so handlers can query the status.
        let mut remaining = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                Action::EmitStatus(state) => {
                    tracing::debug!("Sync status -> {}", state);
                    self.bus.publish(SyncEvent::StatusChange(state));
                }
                Action::Warn(reason) => {
                    tracing::warn!("Cannot sync: {}", reason);
                }
                other => remaining.push(other),
            }
        }
        remaining
    }

    /// Current state.
    pub fn current(&self) -> SyncState {
        self.lock().state()
    }

    /// Copy of the underlying machine.
    pub fn machine(&self) -> SyncMachine {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn publishes_status_and_returns_other_actions() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = bus.subscribe(EventKind::StatusChange, move |event| {
            if let SyncEvent::StatusChange(state) = event {
                sink.lock().unwrap().push(*state);
            }
        });

        let tracker = StatusTracker::new(false, bus);
        let actions = tracker.apply(Event::ConnectivityChanged {
            online: true,
            authenticated: true,
        });

        assert_eq!(*seen.lock().unwrap(), vec![SyncState::Syncing]);
        assert_eq!(actions, vec![Action::StartConnections, Action::StartTicker]);
        assert_eq!(tracker.current(), SyncState::Syncing);
    }

    #[test]
    fn warnings_are_consumed() {
        let tracker = StatusTracker::new(false, EventBus::new());
        let actions = tracker.apply(Event::SyncRequested { open_sessions: 0 });
        assert!(actions.is_empty());
        assert_eq!(tracker.current(), SyncState::Offline);
    }

    #[test]
    fn handler_can_read_status_during_publish() {
        let bus = EventBus::new();
        let tracker = StatusTracker::new(true, bus.clone());
        let observed = Arc::new(Mutex::new(None));

        let reader = tracker.clone();
        let sink = Arc::clone(&observed);
        let _sub = bus.subscribe(EventKind::StatusChange, move |_| {
            *sink.lock().unwrap() = Some(reader.current());
        });

        tracker.apply(Event::EndpointOpened);
        assert_eq!(*observed.lock().unwrap(), Some(SyncState::Synced));
    }
}
