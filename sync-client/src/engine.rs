//! SyncEngine - the main interface for feedsync.
//!
//! This module provides [`SyncEngine`], the long-lived object applications
//! construct once and drive through `init`, `sync_now` and `destroy`.
//!
//! # Architecture
//!
//! SyncEngine uses a pure state machine (from sync-core) for status logic
//! and interprets the actions to perform actual I/O via the
//! [`ConnectionManager`].
//!
//! ```text
//! connectivity ─┐
//! ticker ───────┼─> control loop ─> SyncMachine ─> actions ─> ConnectionManager
//! settle timer ─┘                                               │
//! sync_now() ──────────────────────────────────────────────────┘
//! ```
//!
//! Timers never call back into the engine directly: they post to the
//! control loop, which owns the reaction. The loop holds only a weak
//! reference, so dropping every engine handle stops it.
//!
//! # Example
//!
//! ```ignore
//! use feedsync_client::{Connectivity, EngineConfig, MemoryNetwork, MemoryStore, StaticAuth, SyncEngine};
//!
//! let (online, connectivity) = tokio::sync::watch::channel(Connectivity::Online);
//! let store = Arc::new(MemoryStore::new());
//! let engine = SyncEngine::new(
//!     EngineConfig::default(),
//!     MemoryNetwork::new(),
//!     store.clone(),
//!     store,
//!     Arc::new(StaticAuth::signed_in(user_id)),
//!     connectivity,
//! );
//!
//! engine.init().await;
//! engine.sync_now().await;
//! engine.destroy().await;
//! ```

use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, Identity};
use crate::directory::PeerDirectory;
use crate::events::EventBus;
use crate::replication::Replicator;
use crate::status::StatusTracker;
use crate::store::{Authenticator, CredentialStore, LocalStore};
use crate::transport::Transport;
use feedsync_core::{Action, Event, SyncState};
use feedsync_types::{PeerAddress, UserId};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Network reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// The network is reachable.
    Online,
    /// The network is unreachable.
    Offline,
}

impl Connectivity {
    /// Whether this is [`Connectivity::Online`].
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

/// Timer firings posted to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Tick,
    Settled,
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    identity: Option<Identity>,
    timers: Option<mpsc::UnboundedSender<Timer>>,
    control: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    settle: Option<JoinHandle<()>>,
}

struct EngineInner<T: Transport> {
    config: EngineConfig,
    bus: EventBus,
    status: StatusTracker,
    connections: ConnectionManager<T>,
    store: Arc<dyn LocalStore>,
    auth: Arc<dyn Authenticator>,
    connectivity: watch::Receiver<Connectivity>,
    lifecycle: Mutex<Lifecycle>,
}

/// The peer sync engine.
///
/// Cloning gives another handle to the same engine.
pub struct SyncEngine<T: Transport> {
    inner: Arc<EngineInner<T>>,
}

impl<T: Transport> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SyncEngine<T> {
    /// Create an engine. Nothing runs until [`init`](Self::init).
    pub fn new(
        config: EngineConfig,
        transport: T,
        store: Arc<dyn LocalStore>,
        credentials: Arc<dyn CredentialStore>,
        auth: Arc<dyn Authenticator>,
        connectivity: watch::Receiver<Connectivity>,
    ) -> Self {
        let bus = EventBus::new();
        let status = StatusTracker::new(connectivity.borrow().is_online(), bus.clone());
        let directory = PeerDirectory::new(Arc::clone(&store), config.peer_freshness());
        let replicator = Replicator::new(Arc::clone(&store), credentials, directory.clone());
        let connections = ConnectionManager::new(
            Arc::new(transport),
            replicator,
            directory,
            bus.clone(),
            status.clone(),
            config.retry_backoff(),
        );

        Self {
            inner: Arc::new(EngineInner {
                config,
                bus,
                status,
                connections,
                store,
                auth,
                connectivity,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Start syncing for the signed-in user.
    ///
    /// Does nothing (beyond a warning) when nobody is signed in, and nothing
    /// at all when already initialized.
    pub async fn init(&self) {
        let inner = &self.inner;
        let Some(user_id) = inner.auth.current_user_id() else {
            inner.status.apply(Event::Start {
                authenticated: false,
            });
            return;
        };

        {
            let mut lifecycle = inner.lifecycle.lock().await;
            if lifecycle.initialized {
                tracing::debug!("Sync engine already initialized");
                return;
            }
            lifecycle.initialized = true;
            lifecycle.identity = Some(inner.resolve_identity(user_id).await);

            let (timers_tx, timers_rx) = mpsc::unbounded_channel();
            lifecycle.timers = Some(timers_tx);
            lifecycle.control = Some(tokio::spawn(control_loop(
                Arc::downgrade(&self.inner),
                inner.connectivity.clone(),
                timers_rx,
            )));
        }

        tracing::info!("Sync engine initialized");
        inner.handle(Event::Start {
            authenticated: true,
        })
        .await;
    }

    /// Push to every peer now, dialing known peers first if none are connected.
    ///
    /// Ignored with a warning while offline or while the self endpoint is not
    /// currently open (before the first open, or during a retry).
    pub async fn sync_now(&self) {
        if self.inner.auth.current_user_id().is_none() {
            tracing::warn!("Cannot sync: not authenticated");
            return;
        }
        let open_sessions = self.inner.connections.session_count().await;
        self.inner
            .handle(Event::SyncRequested { open_sessions })
            .await;
    }

    /// Stop everything: timers, retries, sessions, endpoint and the
    /// connectivity listener. Safe to call repeatedly.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        let tasks = {
            let mut lifecycle = inner.lifecycle.lock().await;
            if !lifecycle.initialized {
                return;
            }
            lifecycle.initialized = false;
            lifecycle.timers = None;
            [
                lifecycle.control.take(),
                lifecycle.ticker.take(),
                lifecycle.settle.take(),
            ]
        };

        // The control loop may be mid-way through starting connections; it
        // must be gone before Shutdown stops them.
        for task in tasks.into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }

        inner.handle(Event::Shutdown).await;
        tracing::info!("Sync engine destroyed");
    }

    /// Current sync state.
    pub fn sync_status(&self) -> SyncState {
        self.inner.status.current()
    }

    /// Address of the current (or most recent) self endpoint.
    pub async fn self_address(&self) -> Option<PeerAddress> {
        self.inner.connections.self_address().await
    }

    /// Peers with an open session.
    pub async fn open_sessions(&self) -> Vec<PeerAddress> {
        self.inner.connections.open_sessions().await
    }

    /// The event bus applications subscribe to.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The connection manager, for inspection.
    pub fn connections(&self) -> &ConnectionManager<T> {
        &self.inner.connections
    }

    /// The configuration the engine runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl<T: Transport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("status", &self.inner.status.current())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<T: Transport> EngineInner<T> {
    /// Display name is the user's name when the store knows it.
    async fn resolve_identity(&self, user_id: UserId) -> Identity {
        let display_name = match self.store.get_user(&user_id).await {
            Ok(Some(user)) => user.username,
            Ok(None) => user_id.to_string(),
            Err(e) => {
                tracing::warn!("Failed to load user {}: {}", user_id, e);
                user_id.to_string()
            }
        };
        Identity {
            user_id,
            display_name,
        }
    }

    async fn handle(&self, event: Event) {
        let actions = self.status.apply(event);
        self.execute(actions).await;
    }

    async fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::StartConnections => {
                    let identity = self.lifecycle.lock().await.identity.clone();
                    match identity {
                        Some(identity) => self.connections.start(identity).await,
                        None => tracing::debug!("No identity yet; not starting connections"),
                    }
                }
                Action::StopConnections => self.connections.stop().await,
                Action::StartTicker => self.start_ticker().await,
                Action::StopTicker => self.stop_timers().await,
                Action::ConnectKnownPeers => self.connections.connect_known_peers().await,
                Action::PushToAll => self.connections.push_all().await,
                Action::StartSettleTimer => self.start_settle_timer().await,
                // Consumed by the status tracker
                Action::EmitStatus(_) | Action::Warn(_) => {}
            }
        }
    }

    async fn start_ticker(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.ticker.is_some() {
            return;
        }
        let Some(timers) = lifecycle.timers.clone() else {
            return;
        };
        lifecycle.ticker = Some(spawn_ticker(self.config.sync_interval(), timers));
    }

    async fn stop_timers(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        for task in [lifecycle.ticker.take(), lifecycle.settle.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }

    async fn start_settle_timer(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(timers) = lifecycle.timers.clone() else {
            return;
        };
        if let Some(previous) = lifecycle.settle.take() {
            previous.abort();
        }
        let delay = self.config.settle_delay();
        lifecycle.settle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(Timer::Settled);
        }));
    }

    async fn on_timer(&self, timer: Timer) {
        match timer {
            Timer::Tick => {
                let open_sessions = self.connections.session_count().await;
                tracing::debug!("Periodic sync ({} sessions)", open_sessions);
                self.handle(Event::Tick { open_sessions }).await;
            }
            Timer::Settled => self.handle(Event::SettleElapsed).await,
        }
    }

    async fn on_connectivity(&self, connectivity: Connectivity) {
        tracing::info!("Connectivity changed: {:?}", connectivity);
        self.handle(Event::ConnectivityChanged {
            online: connectivity.is_online(),
            authenticated: self.auth.current_user_id().is_some(),
        })
        .await;
    }
}

/// Periodic tick task.
fn spawn_ticker(period: Duration, timers: mpsc::UnboundedSender<Timer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if period.is_zero() {
            tracing::warn!("Periodic sync disabled (zero interval)");
            return;
        }

        tracing::debug!("Periodic sync started (interval: {:?})", period);
        let mut timer = interval_at(Instant::now() + period, period);
        loop {
            timer.tick().await;
            if timers.send(Timer::Tick).is_err() {
                break;
            }
        }
    })
}

/// Reacts to connectivity changes and timer firings until the engine is
/// destroyed or dropped.
async fn control_loop<T: Transport>(
    engine: Weak<EngineInner<T>>,
    mut connectivity: watch::Receiver<Connectivity>,
    mut timers: mpsc::UnboundedReceiver<Timer>,
) {
    let mut watching = true;
    loop {
        tokio::select! {
            changed = connectivity.changed(), if watching => {
                if changed.is_err() {
                    tracing::debug!("Connectivity source dropped");
                    watching = false;
                    continue;
                }
                let current = *connectivity.borrow_and_update();
                let Some(engine) = engine.upgrade() else { break };
                engine.on_connectivity(current).await;
            }
            timer = timers.recv() => {
                let Some(timer) = timer else { break };
                let Some(engine) = engine.upgrade() else { break };
                engine.on_timer(timer).await;
            }
        }
    }
}
