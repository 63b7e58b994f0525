//! In-process replicas for the CLI commands.

use anyhow::{Context, Result};
use feedsync_client::{
    Connectivity, EngineConfig, LocalStore, MemoryNetwork, MemoryStore, StaticAuth, SyncEngine,
};
use feedsync_types::{PeerAddress, PeerRecord, ReplicatedFeedback, ReplicatedUser, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Time for in-memory sessions to open and exchange snapshots.
const DELIVERY_GRACE: Duration = Duration::from_millis(50);

/// One device: a signed-in user, a store and an engine.
pub struct Replica {
    pub name: String,
    pub user: ReplicatedUser,
    pub store: MemoryStore,
    pub engine: SyncEngine<MemoryNetwork>,
    online: watch::Sender<Connectivity>,
}

impl Replica {
    /// Create a replica whose user is already in its own store.
    pub async fn new(network: &MemoryNetwork, name: &str, config: &EngineConfig) -> Result<Self> {
        let store = MemoryStore::new();
        let user = ReplicatedUser::new(name, format!("{}@example.com", name), Timestamp::now());
        store
            .add_user(user.clone())
            .await
            .with_context(|| format!("Failed to create user {}", name))?;

        let (online, connectivity) = watch::channel(Connectivity::Online);
        let shared = Arc::new(store.clone());
        let engine = SyncEngine::new(
            config.clone(),
            network.clone(),
            shared.clone(),
            shared,
            Arc::new(StaticAuth::signed_in(user.id)),
            connectivity,
        );

        Ok(Self {
            name: name.to_string(),
            user,
            store,
            engine,
            online,
        })
    }

    /// Start the engine and wait for the self endpoint.
    pub async fn start(&self) -> Result<PeerAddress> {
        self.engine.init().await;
        deliver().await;
        self.address().await
    }

    /// Current self address.
    pub async fn address(&self) -> Result<PeerAddress> {
        self.engine
            .self_address()
            .await
            .with_context(|| format!("{} has no open endpoint", self.name))
    }

    /// Record `other` in this replica's peer directory.
    pub async fn introduce(&self, other: &Replica) -> Result<()> {
        let record = PeerRecord::new(other.address().await?, &other.name, Timestamp::now());
        self.store
            .upsert_peer(record)
            .await
            .with_context(|| format!("Failed to introduce {} to {}", other.name, self.name))
    }

    /// Create a feedback record authored by this replica's user.
    pub async fn create_feedback(
        &self,
        title: &str,
        description: &str,
        at: Timestamp,
    ) -> Result<ReplicatedFeedback> {
        let feedback = ReplicatedFeedback::new(
            feedsync_types::FeedbackKind::Suggestion,
            title,
            description,
            &self.user,
            at,
        );
        self.store
            .add_feedback(feedback.clone())
            .await
            .context("Failed to store feedback")?;
        Ok(feedback)
    }

    /// Flip the replica's connectivity.
    pub fn set_online(&self, online: bool) {
        let connectivity = if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        // The engine holds the receiver for as long as the replica exists
        let _ = self.online.send(connectivity);
    }
}

/// Let in-flight sessions and payloads land.
pub async fn deliver() {
    tokio::time::sleep(DELIVERY_GRACE).await;
}

/// Wait out the settle delay so statuses read `synced`.
pub async fn settle(config: &EngineConfig) {
    tokio::time::sleep(config.settle_delay() + DELIVERY_GRACE).await;
}
