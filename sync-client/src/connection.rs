//! Connection manager: the self endpoint and the per-peer session map.
//!
//! # Architecture
//!
//! [`ConnectionManager::start`] spawns a single driver task that owns the
//! endpoint lifecycle:
//!
//! ```text
//! open(address) ──ok──> dispatch events ──endpoint error──> teardown ─┐
//!      │                                                              │
//!      └──err──────────────> status: error ──> sleep(backoff) <───────┘
//! ```
//!
//! Every attempt derives a fresh `{userId}-{suffix}` address. Sessions are
//! wired the same way whether they were dialed or accepted. The manager is
//! the only owner of the session map and endpoint; everything else reaches
//! them through its methods.

use crate::directory::PeerDirectory;
use crate::events::{EventBus, SyncEvent};
use crate::replication::Replicator;
use crate::status::StatusTracker;
use crate::transport::{
    Direction, Endpoint, EventReceiver, Session, SessionId, Transport, TransportError,
    TransportEvent,
};
use feedsync_core::Event;
use feedsync_types::{Payload, PeerAddress, PeerRecord, Timestamp, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Who this replica is on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The signed-in user.
    pub user_id: UserId,
    /// Name announced in `user-info` and stored for the self peer record.
    pub display_name: String,
}

/// One open session with one peer.
#[derive(Debug, Clone)]
pub struct SyncSession {
    handle: Arc<dyn Session>,
    direction: Direction,
    opened_at: Timestamp,
}

impl SyncSession {
    /// Address of the remote peer.
    pub fn peer(&self) -> &PeerAddress {
        self.handle.peer()
    }

    /// Transport session id.
    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Whether we dialed or accepted it.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// When the session opened.
    pub fn opened_at(&self) -> Timestamp {
        self.opened_at
    }
}

#[derive(Default)]
struct ManagerState {
    identity: Option<Identity>,
    endpoint: Option<Arc<dyn Endpoint>>,
    self_address: Option<PeerAddress>,
    sessions: HashMap<PeerAddress, SyncSession>,
    driver: Option<JoinHandle<()>>,
}

/// Owns zero or one self endpoint and the sessions opened through it.
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    replicator: Replicator,
    directory: PeerDirectory,
    bus: EventBus,
    status: StatusTracker,
    retry_backoff: Duration,
    state: Arc<Mutex<ManagerState>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            replicator: self.replicator.clone(),
            directory: self.directory.clone(),
            bus: self.bus.clone(),
            status: self.status.clone(),
            retry_backoff: self.retry_backoff,
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a stopped manager.
    pub fn new(
        transport: Arc<T>,
        replicator: Replicator,
        directory: PeerDirectory,
        bus: EventBus,
        status: StatusTracker,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            transport,
            replicator,
            directory,
            bus,
            status,
            retry_backoff,
            state: Arc::new(Mutex::new(ManagerState::default())),
        }
    }

    /// Open the self endpoint as `identity`, retrying until it succeeds.
    ///
    /// A running endpoint is torn down first.
    pub async fn start(&self, identity: Identity) {
        self.stop().await;

        let mut state = self.state.lock().await;
        state.identity = Some(identity.clone());
        let manager = self.clone();
        state.driver = Some(tokio::spawn(async move { manager.run(identity).await }));
    }

    /// Close every session and the self endpoint, and cancel any pending retry.
    ///
    /// Safe to call repeatedly and when nothing is open.
    pub async fn stop(&self) {
        let driver = self.state.lock().await.driver.take();
        if let Some(driver) = driver {
            driver.abort();
            // Cancelled is the expected outcome.
            let _ = driver.await;
        }
        self.close_all().await;
    }

    /// Request a session with `peer`.
    ///
    /// No-op when the endpoint is not open, when a session with `peer`
    /// already exists, or when `peer` is our own address.
    pub async fn connect(&self, peer: &PeerAddress) {
        let endpoint = {
            let state = self.state.lock().await;
            if state.sessions.contains_key(peer) || state.self_address.as_ref() == Some(peer) {
                return;
            }
            match &state.endpoint {
                Some(endpoint) => Arc::clone(endpoint),
                None => return,
            }
        };

        tracing::debug!("Connecting to {}", peer);
        if let Err(e) = endpoint.connect(peer).await {
            tracing::warn!("Failed to connect to {}: {}", peer, e);
        }
    }

    /// Dial every fresh directory entry we are not already connected to.
    pub async fn connect_known_peers(&self) {
        let self_address = {
            let state = self.state.lock().await;
            if state.endpoint.is_none() {
                return;
            }
            match &state.self_address {
                Some(address) => address.clone(),
                None => return,
            }
        };

        match self
            .directory
            .reconnect_candidates(&self_address, Timestamp::now())
            .await
        {
            Ok(peers) => {
                for peer in peers {
                    self.connect(&peer).await;
                }
            }
            Err(e) => tracing::warn!("Failed to list known peers: {}", e),
        }
    }

    /// Push local snapshots to every open session.
    pub async fn push_all(&self) {
        let (sessions, display_name) = {
            let state = self.state.lock().await;
            let sessions: Vec<_> = state
                .sessions
                .values()
                .map(|session| Arc::clone(&session.handle))
                .collect();
            (sessions, Self::display_name(&state))
        };

        for session in sessions {
            self.push(session.as_ref(), &display_name).await;
        }
    }

    /// Addresses of every peer with an open session.
    pub async fn open_sessions(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<_> = self.state.lock().await.sessions.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// The session with `peer`, if one is open.
    pub async fn session(&self, peer: &PeerAddress) -> Option<SyncSession> {
        self.state.lock().await.sessions.get(peer).cloned()
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Address of the current (or most recent) self endpoint.
    pub async fn self_address(&self) -> Option<PeerAddress> {
        self.state.lock().await.self_address.clone()
    }

    /// Whether the self endpoint is open.
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.endpoint.is_some()
    }

    fn display_name(state: &ManagerState) -> String {
        state
            .identity
            .as_ref()
            .map(|identity| identity.display_name.clone())
            .unwrap_or_default()
    }

    async fn push(&self, session: &dyn Session, display_name: &str) {
        if let Err(e) = self.replicator.sync_with_peer(session, display_name).await {
            tracing::warn!("Push to {} failed: {}", session.peer(), e);
        }
    }

    /// Driver loop: open, serve, back off, repeat.
    async fn run(self, identity: Identity) {
        loop {
            let address = PeerAddress::generate(&identity.user_id);
            let (events_tx, mut events) = mpsc::unbounded_channel();

            match self.transport.open(&address, events_tx).await {
                Ok(endpoint) => {
                    self.on_endpoint_open(&identity, address.clone(), endpoint.into())
                        .await;
                    let error = self.dispatch(&mut events).await;
                    tracing::warn!("Self endpoint {} failed: {}", address, error);
                    self.close_all().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to open self endpoint {}: {}", address, e);
                }
            }

            self.status.apply(Event::EndpointFailed);
            tracing::info!("Retrying self endpoint in {:?}", self.retry_backoff);
            tokio::time::sleep(self.retry_backoff).await;
        }
    }

    async fn on_endpoint_open(
        &self,
        identity: &Identity,
        address: PeerAddress,
        endpoint: Arc<dyn Endpoint>,
    ) {
        {
            let mut state = self.state.lock().await;
            state.endpoint = Some(endpoint);
            state.self_address = Some(address.clone());
        }
        tracing::info!("Self endpoint open as {}", address);
        self.status.apply(Event::EndpointOpened);

        let record = PeerRecord::new(address, identity.display_name.clone(), Timestamp::now());
        if let Err(e) = self.directory.upsert(record).await {
            tracing::warn!("Failed to record self peer: {}", e);
        }

        self.connect_known_peers().await;
    }

    /// Handle transport events until the endpoint fails.
    async fn dispatch(&self, events: &mut EventReceiver) -> TransportError {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::SessionOpened { session, direction } => {
                    self.on_session_open(session, direction).await
                }
                TransportEvent::Message { peer, data, .. } => self.on_message(peer, &data).await,
                TransportEvent::SessionClosed { peer, session } => {
                    self.on_session_closed(&peer, session).await
                }
                TransportEvent::SessionError {
                    peer,
                    session,
                    error,
                } => {
                    tracing::warn!("Session {} with {} failed: {}", session, peer, error);
                    self.on_session_closed(&peer, session).await
                }
                TransportEvent::EndpointError { error } => return error,
            }
        }
        TransportError::EndpointFailed("event channel closed".into())
    }

    async fn on_session_open(&self, session: Arc<dyn Session>, direction: Direction) {
        let peer = session.peer().clone();
        let (display_name, displaced) = {
            let mut state = self.state.lock().await;
            let self_address = state.self_address.clone();
            if let Some(existing) = state.sessions.get(&peer) {
                if keeps_existing(existing.direction, direction, self_address.as_ref(), &peer) {
                    drop(state);
                    tracing::debug!(
                        "Closing duplicate session {} with {} ({:?})",
                        session.id(),
                        peer,
                        direction
                    );
                    session.close().await;
                    return;
                }
            }
            let displaced = state.sessions.insert(
                peer.clone(),
                SyncSession {
                    handle: Arc::clone(&session),
                    direction,
                    opened_at: Timestamp::now(),
                },
            );
            (Self::display_name(&state), displaced)
        };

        if let Some(displaced) = displaced {
            tracing::debug!(
                "Session {} with {} replaces {}",
                session.id(),
                peer,
                displaced.id()
            );
            displaced.handle.close().await;
        }

        tracing::info!("Session {} with {} open ({:?})", session.id(), peer, direction);
        self.bus.publish(SyncEvent::PeerConnected(peer));
        self.push(session.as_ref(), &display_name).await;
    }

    async fn on_message(&self, peer: PeerAddress, data: &[u8]) {
        let payload = match Payload::from_bytes(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!("Dropping malformed payload from {}: {}", peer, e);
                return;
            }
        };

        let report = self.replicator.process_incoming(&peer, &payload).await;
        tracing::debug!(
            "Merged {} from {}: {} inserted, {} replaced, {} unchanged, {} failed",
            payload.kind(),
            peer,
            report.inserted,
            report.replaced,
            report.unchanged,
            report.failed
        );
        self.bus.publish(SyncEvent::DataReceived { peer, payload });
    }

    async fn on_session_closed(&self, peer: &PeerAddress, session: SessionId) {
        let removed = {
            let mut state = self.state.lock().await;
            match state.sessions.get(peer) {
                Some(current) if current.id() == session => state.sessions.remove(peer),
                _ => None,
            }
        };

        match removed {
            Some(removed) => {
                removed.handle.close().await;
                tracing::info!("Session {} with {} closed", session, peer);
                self.bus.publish(SyncEvent::PeerDisconnected(peer.clone()));
            }
            None => tracing::debug!("Ignoring close of stale session {} with {}", session, peer),
        }
    }

    /// Close every session and the endpoint, keeping the last address.
    async fn close_all(&self) {
        let (sessions, endpoint) = {
            let mut state = self.state.lock().await;
            let sessions: Vec<_> = state.sessions.drain().collect();
            (sessions, state.endpoint.take())
        };

        for (peer, session) in sessions {
            session.handle.close().await;
            tracing::info!("Session {} with {} closed", session.id(), peer);
            self.bus.publish(SyncEvent::PeerDisconnected(peer));
        }

        if let Some(endpoint) = endpoint {
            endpoint.close().await;
            tracing::info!("Self endpoint {} closed", endpoint.address());
        }
    }
}

/// Which of two sessions with the same peer survives.
///
/// Both ends must agree, so the choice depends only on who dialed: the
/// session dialed by the lower address wins. Two sessions dialed by the same
/// side keep the newer one.
fn keeps_existing(
    existing: Direction,
    incoming: Direction,
    self_address: Option<&PeerAddress>,
    peer: &PeerAddress,
) -> bool {
    let Some(self_address) = self_address else {
        return false;
    };
    dialer(existing, self_address, peer) < dialer(incoming, self_address, peer)
}

fn dialer<'a>(
    direction: Direction,
    self_address: &'a PeerAddress,
    peer: &'a PeerAddress,
) -> &'a PeerAddress {
    match direction {
        Direction::Outbound => self_address,
        Direction::Inbound => peer,
    }
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}
