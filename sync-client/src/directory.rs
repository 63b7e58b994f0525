//! Peer directory backed by the local store.
//!
//! Freshness rules live in [`feedsync_core::directory`]; this module only
//! applies them to what the store holds.

use crate::store::{LocalStore, StoreError};
use feedsync_core::{prune_stale, reconnect_candidates};
use feedsync_types::{PeerAddress, PeerRecord, Timestamp};
use std::sync::Arc;
use std::time::Duration;

/// Known peers, persisted in the local store.
#[derive(Clone)]
pub struct PeerDirectory {
    store: Arc<dyn LocalStore>,
    window: Duration,
}

impl PeerDirectory {
    /// Directory over `store`, treating peers older than `window` as stale.
    pub fn new(store: Arc<dyn LocalStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// The freshness window used for reconnection.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Insert `record`, or refresh the existing entry for its address.
    pub async fn upsert(&self, record: PeerRecord) -> Result<(), StoreError> {
        self.store.upsert_peer(record).await
    }

    /// Every known peer.
    pub async fn list(&self) -> Result<Vec<PeerRecord>, StoreError> {
        self.store.list_peers().await
    }

    /// Peers still fresh at `now`. Nothing is deleted.
    pub async fn prune_stale(
        &self,
        now: Timestamp,
        window: Duration,
    ) -> Result<Vec<PeerRecord>, StoreError> {
        Ok(prune_stale(self.list().await?, now, window))
    }

    /// Fresh peers worth dialing from `self_address`.
    pub async fn reconnect_candidates(
        &self,
        self_address: &PeerAddress,
        now: Timestamp,
    ) -> Result<Vec<PeerAddress>, StoreError> {
        Ok(reconnect_candidates(
            self.list().await?,
            self_address,
            now,
            self.window,
        ))
    }

    /// Delete one peer. Returns whether it was known.
    pub async fn remove(&self, address: &PeerAddress) -> Result<bool, StoreError> {
        self.store.remove_peer(address).await
    }

    /// Delete every stale peer. Returns how many were removed.
    pub async fn purge_stale(&self, now: Timestamp, window: Duration) -> Result<usize, StoreError> {
        let stale: Vec<_> = self
            .list()
            .await?
            .into_iter()
            .filter(|record| !feedsync_core::is_fresh(record, now, window))
            .collect();

        let mut removed = 0;
        for record in stale {
            if self.remove(&record.peer_address).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Purged {} stale peers", removed);
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for PeerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerDirectory")
            .field("window", &self.window)
            .finish()
    }
}
