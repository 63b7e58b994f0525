//! In-memory transport for testing and local simulation.
//!
//! [`MemoryNetwork`] plays the part of the rendezvous service: endpoints
//! register under their address, and sessions are brokered between them.
//! Failures can be injected for the next open, connect or send.

use super::{
    Direction, Endpoint, EventSender, Session, SessionId, Transport, TransportError,
    TransportEvent,
};
use async_trait::async_trait;
use feedsync_types::PeerAddress;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-process network shared by every replica in a test.
///
/// Cloning shares the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Default)]
struct NetworkInner {
    endpoints: HashMap<PeerAddress, EventSender>,
    /// Session id -> (dialer, acceptor)
    sessions: HashMap<SessionId, (PeerAddress, PeerAddress)>,
    next_session: u64,
    delivered: usize,
    fail_next_open: Option<String>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
}

impl NetworkInner {
    fn notify(&self, address: &PeerAddress, event: TransportEvent) {
        if let Some(events) = self.endpoints.get(address) {
            // The owner may already have dropped its receiver during teardown.
            let _ = events.send(event);
        }
    }

    fn sessions_of(&self, address: &PeerAddress) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|(_, (a, b))| a == address || b == address)
            .map(|(id, _)| *id)
            .collect()
    }
}

fn lock(inner: &Mutex<NetworkInner>) -> MutexGuard<'_, NetworkInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next `open()` to fail with the given error.
    pub fn fail_next_open(&self, error: &str) {
        lock(&self.inner).fail_next_open = Some(error.to_string());
    }

    /// Cause the next `connect()` to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        lock(&self.inner).fail_next_connect = Some(error.to_string());
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        lock(&self.inner).fail_next_send = Some(error.to_string());
    }

    /// Report a fatal error to the endpoint registered under `address`.
    pub fn fail_endpoint(&self, address: &PeerAddress, error: &str) {
        let inner = lock(&self.inner);
        inner.notify(
            address,
            TransportEvent::EndpointError {
                error: TransportError::EndpointFailed(error.to_string()),
            },
        );
    }

    /// Break every session between `a` and `b`, reporting an error to both ends.
    pub fn sever(&self, a: &PeerAddress, b: &PeerAddress) -> usize {
        let mut inner = lock(&self.inner);
        let severed: Vec<_> = inner
            .sessions
            .iter()
            .filter(|(_, (x, y))| (x == a && y == b) || (x == b && y == a))
            .map(|(id, _)| *id)
            .collect();

        for id in &severed {
            inner.sessions.remove(id);
            for (local, remote) in [(a, b), (b, a)] {
                inner.notify(
                    local,
                    TransportEvent::SessionError {
                        peer: remote.clone(),
                        session: *id,
                        error: TransportError::ConnectionClosed,
                    },
                );
            }
        }
        severed.len()
    }

    /// Deliver raw bytes to `to` as if `from` had sent them.
    pub fn inject(&self, to: &PeerAddress, from: &PeerAddress, data: Vec<u8>) {
        let inner = lock(&self.inner);
        inner.notify(
            to,
            TransportEvent::Message {
                peer: from.clone(),
                session: SessionId::new(0),
                data,
            },
        );
    }

    /// Whether an endpoint is registered under `address`.
    pub fn is_registered(&self, address: &PeerAddress) -> bool {
        lock(&self.inner).endpoints.contains_key(address)
    }

    /// Addresses of every registered endpoint.
    pub fn endpoints(&self) -> Vec<PeerAddress> {
        let mut addresses: Vec<_> = lock(&self.inner).endpoints.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Number of sessions currently open anywhere on the network.
    pub fn session_count(&self) -> usize {
        lock(&self.inner).sessions.len()
    }

    /// Number of messages delivered so far.
    pub fn delivered(&self) -> usize {
        lock(&self.inner).delivered
    }
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &inner.endpoints.len())
            .field("sessions", &inner.sessions.len())
            .field("delivered", &inner.delivered)
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn open(
        &self,
        address: &PeerAddress,
        events: EventSender,
    ) -> Result<Box<dyn Endpoint>, TransportError> {
        let mut inner = lock(&self.inner);

        // Check for forced failure
        if let Some(error) = inner.fail_next_open.take() {
            return Err(TransportError::EndpointFailed(error));
        }

        if inner.endpoints.contains_key(address) {
            return Err(TransportError::EndpointFailed(format!(
                "address {} already in use",
                address
            )));
        }

        inner.endpoints.insert(address.clone(), events);
        Ok(Box::new(MemoryEndpoint {
            address: address.clone(),
            network: Arc::clone(&self.inner),
        }))
    }
}

/// Endpoint handle returned by [`MemoryNetwork::open`].
struct MemoryEndpoint {
    address: PeerAddress,
    network: Arc<Mutex<NetworkInner>>,
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn address(&self) -> &PeerAddress {
        &self.address
    }

    async fn connect(&self, peer: &PeerAddress) -> Result<(), TransportError> {
        let mut inner = lock(&self.network);

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        if !inner.endpoints.contains_key(&self.address) {
            return Err(TransportError::NotConnected);
        }
        if !inner.endpoints.contains_key(peer) {
            return Err(TransportError::PeerUnavailable(peer.clone()));
        }

        inner.next_session += 1;
        let id = SessionId::new(inner.next_session);
        inner
            .sessions
            .insert(id, (self.address.clone(), peer.clone()));

        let ends = [
            (&self.address, peer, Direction::Outbound),
            (peer, &self.address, Direction::Inbound),
        ];
        for (local, remote, direction) in ends {
            let session = MemorySession {
                id,
                local: local.clone(),
                peer: remote.clone(),
                network: Arc::clone(&self.network),
            };
            inner.notify(
                local,
                TransportEvent::SessionOpened {
                    session: Arc::new(session),
                    direction,
                },
            );
        }
        Ok(())
    }

    async fn close(&self) {
        let mut inner = lock(&self.network);
        inner.endpoints.remove(&self.address);

        for id in inner.sessions_of(&self.address) {
            if let Some((a, b)) = inner.sessions.remove(&id) {
                let remote = if a == self.address { b } else { a };
                inner.notify(
                    &remote,
                    TransportEvent::SessionClosed {
                        peer: self.address.clone(),
                        session: id,
                    },
                );
            }
        }
    }
}

/// One end of a brokered session.
struct MemorySession {
    id: SessionId,
    local: PeerAddress,
    peer: PeerAddress,
    network: Arc<Mutex<NetworkInner>>,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("peer", &self.peer)
            .finish()
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = lock(&self.network);

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        if !inner.sessions.contains_key(&self.id) {
            return Err(TransportError::ConnectionClosed);
        }

        let events = inner
            .endpoints
            .get(&self.peer)
            .ok_or(TransportError::ConnectionClosed)?;
        events
            .send(TransportEvent::Message {
                peer: self.local.clone(),
                session: self.id,
                data: data.to_vec(),
            })
            .map_err(|_| TransportError::ConnectionClosed)?;

        inner.delivered += 1;
        Ok(())
    }

    async fn close(&self) {
        let mut inner = lock(&self.network);
        if inner.sessions.remove(&self.id).is_some() {
            inner.notify(
                &self.local,
                TransportEvent::SessionClosed {
                    peer: self.peer.clone(),
                    session: self.id,
                },
            );
            inner.notify(
                &self.peer,
                TransportEvent::SessionClosed {
                    peer: self.local.clone(),
                    session: self.id,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EventReceiver;
    use tokio::sync::mpsc;

    async fn open(network: &MemoryNetwork, address: &str) -> (Box<dyn Endpoint>, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = network.open(&PeerAddress::from(address), tx).await.unwrap();
        (endpoint, rx)
    }

    fn opened(event: TransportEvent) -> (Arc<dyn Session>, Direction) {
        match event {
            TransportEvent::SessionOpened { session, direction } => (session, direction),
            other => panic!("Expected SessionOpened, got {:?}", other),
        }
    }

    // ===========================================
    // Endpoint Tests
    // ===========================================

    #[tokio::test]
    async fn open_registers_address() {
        let network = MemoryNetwork::new();
        let (endpoint, _rx) = open(&network, "alice-1").await;

        assert_eq!(endpoint.address().as_str(), "alice-1");
        assert!(network.is_registered(&PeerAddress::from("alice-1")));

        endpoint.close().await;
        assert!(!network.is_registered(&PeerAddress::from("alice-1")));
    }

    #[tokio::test]
    async fn duplicate_address_is_rejected() {
        let network = MemoryNetwork::new();
        let (_endpoint, _rx) = open(&network, "alice-1").await;

        let (tx, _rx2) = mpsc::unbounded_channel();
        let result = network.open(&PeerAddress::from("alice-1"), tx).await;
        assert!(matches!(result, Err(TransportError::EndpointFailed(_))));
    }

    #[tokio::test]
    async fn forced_open_failure() {
        let network = MemoryNetwork::new();
        network.fail_next_open("rendezvous unreachable");

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = network.open(&PeerAddress::from("alice-1"), tx).await;
        assert!(matches!(result, Err(TransportError::EndpointFailed(_))));

        // Next open should work
        let (_endpoint, _rx) = open(&network, "alice-1").await;
    }

    // ===========================================
    // Session Tests
    // ===========================================

    #[tokio::test]
    async fn connect_opens_session_on_both_ends() {
        let network = MemoryNetwork::new();
        let (alice, mut alice_rx) = open(&network, "alice-1").await;
        let (_bob, mut bob_rx) = open(&network, "bob-1").await;

        alice.connect(&PeerAddress::from("bob-1")).await.unwrap();

        let (outbound, direction) = opened(alice_rx.recv().await.unwrap());
        assert_eq!(direction, Direction::Outbound);
        assert_eq!(outbound.peer().as_str(), "bob-1");

        let (inbound, direction) = opened(bob_rx.recv().await.unwrap());
        assert_eq!(direction, Direction::Inbound);
        assert_eq!(inbound.peer().as_str(), "alice-1");

        assert_eq!(outbound.id(), inbound.id());
        assert_eq!(network.session_count(), 1);
    }

    #[tokio::test]
    async fn connect_to_unknown_peer_fails() {
        let network = MemoryNetwork::new();
        let (alice, _rx) = open(&network, "alice-1").await;

        let result = alice.connect(&PeerAddress::from("nobody")).await;
        assert!(matches!(result, Err(TransportError::PeerUnavailable(_))));
    }

    #[tokio::test]
    async fn messages_arrive_tagged_with_sender() {
        let network = MemoryNetwork::new();
        let (alice, mut alice_rx) = open(&network, "alice-1").await;
        let (_bob, mut bob_rx) = open(&network, "bob-1").await;

        alice.connect(&PeerAddress::from("bob-1")).await.unwrap();
        let (session, _) = opened(alice_rx.recv().await.unwrap());
        let _ = bob_rx.recv().await.unwrap();

        session.send(b"hello").await.unwrap();

        match bob_rx.recv().await.unwrap() {
            TransportEvent::Message { peer, data, .. } => {
                assert_eq!(peer.as_str(), "alice-1");
                assert_eq!(data, b"hello");
            }
            other => panic!("Expected Message, got {:?}", other),
        }
        assert_eq!(network.delivered(), 1);
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let network = MemoryNetwork::new();
        let (alice, mut alice_rx) = open(&network, "alice-1").await;
        let (_bob, _bob_rx) = open(&network, "bob-1").await;

        alice.connect(&PeerAddress::from("bob-1")).await.unwrap();
        let (session, _) = opened(alice_rx.recv().await.unwrap());
        network.fail_next_send("buffer full");

        let result = session.send(b"data").await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        session.send(b"data").await.unwrap();
    }

    #[tokio::test]
    async fn closing_session_notifies_both_ends() {
        let network = MemoryNetwork::new();
        let (alice, mut alice_rx) = open(&network, "alice-1").await;
        let (_bob, mut bob_rx) = open(&network, "bob-1").await;

        alice.connect(&PeerAddress::from("bob-1")).await.unwrap();
        let (session, _) = opened(alice_rx.recv().await.unwrap());
        let _ = bob_rx.recv().await.unwrap();

        session.close().await;

        assert!(matches!(
            alice_rx.recv().await.unwrap(),
            TransportEvent::SessionClosed { .. }
        ));
        assert!(matches!(
            bob_rx.recv().await.unwrap(),
            TransportEvent::SessionClosed { .. }
        ));
        assert!(matches!(
            session.send(b"late").await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn closing_endpoint_closes_its_sessions() {
        let network = MemoryNetwork::new();
        let (alice, mut alice_rx) = open(&network, "alice-1").await;
        let (_bob, mut bob_rx) = open(&network, "bob-1").await;

        alice.connect(&PeerAddress::from("bob-1")).await.unwrap();
        let _ = alice_rx.recv().await.unwrap();
        let _ = bob_rx.recv().await.unwrap();

        alice.close().await;

        match bob_rx.recv().await.unwrap() {
            TransportEvent::SessionClosed { peer, .. } => assert_eq!(peer.as_str(), "alice-1"),
            other => panic!("Expected SessionClosed, got {:?}", other),
        }
        assert_eq!(network.session_count(), 0);
    }

    #[tokio::test]
    async fn sever_reports_errors_to_both_ends() {
        let network = MemoryNetwork::new();
        let (alice, mut alice_rx) = open(&network, "alice-1").await;
        let (_bob, mut bob_rx) = open(&network, "bob-1").await;

        alice.connect(&PeerAddress::from("bob-1")).await.unwrap();
        let _ = alice_rx.recv().await.unwrap();
        let _ = bob_rx.recv().await.unwrap();

        let severed = network.sever(&PeerAddress::from("alice-1"), &PeerAddress::from("bob-1"));
        assert_eq!(severed, 1);

        assert!(matches!(
            alice_rx.recv().await.unwrap(),
            TransportEvent::SessionError { .. }
        ));
        assert!(matches!(
            bob_rx.recv().await.unwrap(),
            TransportEvent::SessionError { .. }
        ));
    }

    #[tokio::test]
    async fn fail_endpoint_reports_endpoint_error() {
        let network = MemoryNetwork::new();
        let (_alice, mut alice_rx) = open(&network, "alice-1").await;

        network.fail_endpoint(&PeerAddress::from("alice-1"), "socket reset");

        assert!(matches!(
            alice_rx.recv().await.unwrap(),
            TransportEvent::EndpointError { .. }
        ));
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn clone_shares_network() {
        let network = MemoryNetwork::new();
        let other = network.clone();

        let (_alice, _rx) = open(&network, "alice-1").await;
        assert_eq!(other.endpoints(), vec![PeerAddress::from("alice-1")]);
    }
}
