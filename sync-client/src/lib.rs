//! # feedsync-client
//!
//! Peer sync engine for feedsync.
//!
//! Every device opens a self endpoint, dials the peers it has seen recently
//! and exchanges full snapshots of its users and feedback with each of them.
//! Incoming records are merged last-writer-wins, so any two replicas that
//! have exchanged snapshots hold the same data.
//!
//! ## Features
//!
//! - **Event Bus**: Synchronous typed events for status, data and peers
//! - **Peer Directory**: Known peers with a freshness window
//! - **Connection Manager**: One session per peer, self-healing endpoint
//! - **Replication**: Snapshot push and last-writer-wins merge
//! - **Pure State Machine**: Uses feedsync-core for side-effect-free status logic
//!
//! ## Example
//!
//! ```ignore
//! use feedsync_client::{Connectivity, EngineConfig, EventKind, MemoryNetwork, SyncEngine};
//!
//! let engine = SyncEngine::new(config, MemoryNetwork::new(), store, credentials, auth, connectivity);
//! engine.events().subscribe(EventKind::StatusChange, |event| println!("{:?}", event));
//!
//! engine.init().await;
//! engine.sync_now().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod directory;
pub mod engine;
pub mod events;
pub mod replication;
pub mod status;
pub mod store;
pub mod transport;

pub use config::{ConfigError, EngineConfig};
pub use connection::{ConnectionManager, Identity, SyncSession};
pub use directory::PeerDirectory;
pub use engine::{Connectivity, SyncEngine};
pub use events::{EventBus, EventKind, Subscription, SyncEvent};
pub use replication::{MergeReport, ReplicationError, Replicator};
pub use status::StatusTracker;
pub use store::{Authenticator, CredentialStore, LocalStore, MemoryStore, StaticAuth, StoreError};
pub use transport::{
    Direction, Endpoint, MemoryNetwork, Session, SessionId, Transport, TransportError,
    TransportEvent,
};

pub use feedsync_core::SyncState;
