//! Transport abstraction for feedsync.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying peer-to-peer library (a rendezvous-brokered data channel in
//! production, [`MemoryNetwork`] for testing).
//!
//! # Design
//!
//! The transport is endpoint- and event-oriented:
//! - [`Transport::open`] registers the self endpoint under an address
//! - [`Endpoint::connect`] requests a reliable session with a peer
//! - everything else (sessions opening, messages, closes, failures) arrives
//!   as [`TransportEvent`]s on the channel handed to `open`
//!
//! Inbound and outbound sessions are delivered the same way; only
//! [`Direction`] tells them apart.

mod memory;

pub use memory::MemoryNetwork;

use async_trait::async_trait;
use feedsync_types::PeerAddress;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The self endpoint could not be opened or has died.
    #[error("endpoint failed: {0}")]
    EndpointFailed(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// No endpoint is registered under the requested address.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(PeerAddress),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Identifier of one transport session, shared by both of its ends.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Create from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Which side asked for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A remote peer dialed us.
    Inbound,
    /// We dialed the remote peer.
    Outbound,
}

/// Channel on which an endpoint reports its activity.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of [`EventSender`].
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Activity reported by an open endpoint.
#[derive(Debug)]
pub enum TransportEvent {
    /// A session is ready for use.
    SessionOpened {
        /// Handle to the new session.
        session: Arc<dyn Session>,
        /// Who initiated it.
        direction: Direction,
    },
    /// A message arrived on a session.
    Message {
        /// Transport-level address of the sender.
        peer: PeerAddress,
        /// Session the message arrived on.
        session: SessionId,
        /// Raw payload bytes.
        data: Vec<u8>,
    },
    /// A session was closed by either side.
    SessionClosed {
        /// Remote end of the session.
        peer: PeerAddress,
        /// The closed session.
        session: SessionId,
    },
    /// A session failed.
    SessionError {
        /// Remote end of the session.
        peer: PeerAddress,
        /// The failed session.
        session: SessionId,
        /// What went wrong.
        error: TransportError,
    },
    /// The endpoint itself failed; no further events will follow.
    EndpointError {
        /// What went wrong.
        error: TransportError,
    },
}

/// Factory for self endpoints.
///
/// Implementations handle the underlying connection mechanism
/// (rendezvous-brokered channels, in-memory, etc).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the self endpoint under `address`.
    ///
    /// All later activity is reported on `events`.
    async fn open(
        &self,
        address: &PeerAddress,
        events: EventSender,
    ) -> Result<Box<dyn Endpoint>, TransportError>;
}

/// An open self endpoint.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The address this endpoint is registered under.
    fn address(&self) -> &PeerAddress;

    /// Request a reliable session with `peer`.
    ///
    /// Success only means the request was accepted; the session itself is
    /// reported later as [`TransportEvent::SessionOpened`].
    async fn connect(&self, peer: &PeerAddress) -> Result<(), TransportError>;

    /// Close the endpoint and every session on it.
    async fn close(&self);
}

/// One live bidirectional connection to exactly one peer.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Session identifier.
    fn id(&self) -> SessionId;

    /// Address of the remote end.
    fn peer(&self) -> &PeerAddress;

    /// Send bytes to the remote end. Delivery is best-effort.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the session.
    async fn close(&self);
}
