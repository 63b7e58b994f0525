//! Typed publish/subscribe bus for sync lifecycle events.
//!
//! Delivery is synchronous, on the publishing task, in subscription order.
//! A panicking handler is isolated: it is logged and the remaining handlers
//! still run. There is no queue and no replay.

use feedsync_core::SyncState;
use feedsync_types::{PeerAddress, Payload};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// The four kinds of event a subscriber can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The engine's [`SyncState`] changed.
    StatusChange,
    /// A well-formed payload arrived from a peer and was merged.
    DataReceived,
    /// A session with a peer opened.
    PeerConnected,
    /// A session with a peer closed.
    PeerDisconnected,
}

impl EventKind {
    /// Kebab-case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StatusChange => "status-change",
            EventKind::DataReceived => "data-received",
            EventKind::PeerConnected => "peer-connected",
            EventKind::PeerDisconnected => "peer-disconnected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// New engine state.
    StatusChange(SyncState),
    /// Payload received from `peer`.
    DataReceived {
        /// Transport-level address of the sender.
        peer: PeerAddress,
        /// The decoded payload.
        payload: Payload,
    },
    /// Session opened with the given peer.
    PeerConnected(PeerAddress),
    /// Session closed with the given peer.
    PeerDisconnected(PeerAddress),
}

impl SyncEvent {
    /// The kind subscribers filter on.
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::StatusChange(_) => EventKind::StatusChange,
            SyncEvent::DataReceived { .. } => EventKind::DataReceived,
            SyncEvent::PeerConnected(_) => EventKind::PeerConnected,
            SyncEvent::PeerDisconnected(_) => EventKind::PeerDisconnected,
        }
    }
}

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Registration {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<Registration>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publish/subscribe bus. Cloning shares the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The returned handle removes the handler again; dropping it does not.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push(Registration {
            id,
            kind,
            handler: Arc::new(handler),
        });

        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Deliver `event` to every handler subscribed to its kind.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: SyncEvent) -> usize {
        let kind = event.kind();

        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Handler> = lock(&self.registry)
            .handlers
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| Arc::clone(&registration.handler))
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::error!("{} handler panicked: {}", kind, panic_message(&*panic));
                }
            }
        }
        delivered
    }

    /// Number of handlers currently subscribed to `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .handlers
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &lock(&self.registry).handlers.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    id: u64,
}

impl Subscription {
    /// Remove the handler. Calling this more than once is harmless.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry)
                .handlers
                .retain(|registration| registration.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &EventBus, kind: EventKind) -> (Arc<Mutex<Vec<SyncEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = bus.subscribe(kind, move |event| sink.lock().unwrap().push(event.clone()));
        (seen, subscription)
    }

    #[test]
    fn delivers_only_to_matching_kind() {
        let bus = EventBus::new();
        let (status, _s1) = recorder(&bus, EventKind::StatusChange);
        let (peers, _s2) = recorder(&bus, EventKind::PeerConnected);

        bus.publish(SyncEvent::StatusChange(SyncState::Synced));

        assert_eq!(
            *status.lock().unwrap(),
            vec![SyncEvent::StatusChange(SyncState::Synced)]
        );
        assert!(peers.lock().unwrap().is_empty());
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(EventKind::PeerConnected, move |_| order.lock().unwrap().push(n));
        }

        bus.publish(SyncEvent::PeerConnected(PeerAddress::from("bob-1")));

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::StatusChange, |_| panic!("handler bug"));
        let (seen, _sub) = recorder(&bus, EventKind::StatusChange);

        let delivered = bus.publish(SyncEvent::StatusChange(SyncState::Error));

        assert_eq!(delivered, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        bus.publish(SyncEvent::StatusChange(SyncState::Syncing));

        let (seen, _sub) = recorder(&bus, EventKind::StatusChange);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (seen, subscription) = recorder(&bus, EventKind::PeerDisconnected);
        let (_other, _keep) = recorder(&bus, EventKind::PeerDisconnected);

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert_eq!(bus.subscriber_count(EventKind::PeerDisconnected), 1);
        bus.publish(SyncEvent::PeerDisconnected(PeerAddress::from("bob-1")));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_after_bus_dropped_is_harmless() {
        let bus = EventBus::new();
        let (_seen, subscription) = recorder(&bus, EventKind::StatusChange);
        drop(bus);
        subscription.unsubscribe();
    }

    #[test]
    fn handler_may_unsubscribe_itself_while_running() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let inner_slot = Arc::clone(&slot);
        let inner_calls = Arc::clone(&calls);
        let subscription = bus.subscribe(EventKind::StatusChange, move |_| {
            *inner_calls.lock().unwrap() += 1;
            if let Some(subscription) = inner_slot.lock().unwrap().as_ref() {
                subscription.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(subscription);

        bus.publish(SyncEvent::StatusChange(SyncState::Synced));
        bus.publish(SyncEvent::StatusChange(SyncState::Synced));

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn kind_names() {
        assert_eq!(EventKind::StatusChange.to_string(), "status-change");
        assert_eq!(EventKind::DataReceived.to_string(), "data-received");
        assert_eq!(EventKind::PeerConnected.to_string(), "peer-connected");
        assert_eq!(EventKind::PeerDisconnected.to_string(), "peer-disconnected");
    }
}
