//! Replication protocol: what is pushed to a peer and how incoming
//! snapshots are merged.
//!
//! A push is three payloads in a fixed order: `user-info`, `users-sync`,
//! `feedback-sync`. Nothing is acknowledged. Merging applies the
//! last-writer-wins rule from [`feedsync_core::merge`] to each item
//! independently, so a store failure on one item never stops the rest.

use crate::directory::PeerDirectory;
use crate::store::{CredentialStore, LocalStore, StoreError};
use crate::transport::{Session, TransportError};
use feedsync_core::{resolve, Resolution};
use feedsync_types::{
    FeedbackSync, Payload, PeerAddress, PeerRecord, ReplicatedFeedback, ReplicatedUser, Secret,
    Timestamp, UserInfo, UsersSync,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Why a push stopped early.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// A payload could not be encoded.
    #[error("encoding {kind} failed: {source}")]
    Encode {
        /// Payload kind.
        kind: &'static str,
        /// Underlying error.
        source: feedsync_types::SyncError,
    },
    /// The session refused a payload.
    #[error("sending {kind} failed: {source}")]
    Send {
        /// Payload kind.
        kind: &'static str,
        /// Underlying error.
        source: TransportError,
    },
}

/// Outcome of merging one incoming payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Items that were absent locally and were added.
    pub inserted: usize,
    /// Items whose strictly newer copy replaced the local one.
    pub replaced: usize,
    /// Items where the local copy was kept.
    pub unchanged: usize,
    /// Items abandoned because the store failed.
    pub failed: usize,
}

impl MergeReport {
    /// Whether the local store was modified.
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }

    fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Insert => self.inserted += 1,
            Resolution::Replace => self.replaced += 1,
            Resolution::Keep => self.unchanged += 1,
        }
    }
}

/// Pushes local snapshots and merges remote ones.
#[derive(Clone)]
pub struct Replicator {
    store: Arc<dyn LocalStore>,
    credentials: Arc<dyn CredentialStore>,
    directory: PeerDirectory,
}

impl Replicator {
    /// Create a replicator over the given collaborators.
    pub fn new(
        store: Arc<dyn LocalStore>,
        credentials: Arc<dyn CredentialStore>,
        directory: PeerDirectory,
    ) -> Self {
        Self {
            store,
            credentials,
            directory,
        }
    }

    /// Build the payloads for one push, in send order.
    ///
    /// A snapshot whose collection cannot be read is left out.
    pub async fn snapshot(&self, display_name: &str) -> Vec<Payload> {
        let mut payloads = vec![Payload::UserInfo(UserInfo {
            display_name: display_name.to_string(),
        })];

        match self.users_snapshot().await {
            Ok(users) => payloads.push(Payload::UsersSync(users)),
            Err(e) => tracing::warn!("Skipping users-sync: {}", e),
        }

        match self.store.list_feedback().await {
            Ok(items) => payloads.push(Payload::FeedbackSync(FeedbackSync { items })),
            Err(e) => tracing::warn!("Skipping feedback-sync: {}", e),
        }

        payloads
    }

    async fn users_snapshot(&self) -> Result<UsersSync, StoreError> {
        let users = self.store.list_users().await?;
        let mut secrets = BTreeMap::new();
        for user in &users {
            match self.credentials.get_secret(&user.id).await {
                Ok(Some(secret)) => {
                    secrets.insert(user.id, secret);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Secret for {} unavailable: {}", user.id, e),
            }
        }
        Ok(UsersSync { users, secrets })
    }

    /// Push every local snapshot to `session`.
    pub async fn sync_with_peer(
        &self,
        session: &dyn Session,
        display_name: &str,
    ) -> Result<(), ReplicationError> {
        for payload in self.snapshot(display_name).await {
            let kind = payload.kind();
            let bytes = payload
                .to_bytes()
                .map_err(|source| ReplicationError::Encode { kind, source })?;
            session
                .send(&bytes)
                .await
                .map_err(|source| ReplicationError::Send { kind, source })?;
            tracing::debug!("Sent {} ({} bytes) to {}", kind, bytes.len(), session.peer());
        }
        Ok(())
    }

    /// Merge a payload received from `sender`.
    pub async fn process_incoming(&self, sender: &PeerAddress, payload: &Payload) -> MergeReport {
        match payload {
            Payload::UserInfo(info) => self.merge_user_info(sender, info).await,
            Payload::UsersSync(sync) => self.merge_users(&sync.users, &sync.secrets).await,
            Payload::FeedbackSync(sync) => self.merge_feedback(&sync.items).await,
        }
    }

    async fn merge_user_info(&self, sender: &PeerAddress, info: &UserInfo) -> MergeReport {
        let mut report = MergeReport::default();
        let record = PeerRecord::new(sender.clone(), info.display_name.clone(), Timestamp::now());
        match self.directory.upsert(record).await {
            Ok(()) => tracing::debug!("Recorded peer {} as {}", sender, info.display_name),
            Err(e) => {
                tracing::warn!("Failed to record peer {}: {}", sender, e);
                report.failed += 1;
            }
        }
        report
    }

    async fn merge_users(
        &self,
        users: &[ReplicatedUser],
        secrets: &BTreeMap<feedsync_types::UserId, Secret>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for remote in users {
            match self.merge_user(remote, secrets.get(&remote.id)).await {
                Ok(resolution) => report.record(resolution),
                Err(e) => {
                    tracing::warn!("Failed to merge user {}: {}", remote.id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn merge_user(
        &self,
        remote: &ReplicatedUser,
        secret: Option<&Secret>,
    ) -> Result<Resolution, StoreError> {
        let local = self.store.get_user(&remote.id).await?;
        let resolution = resolve(local.as_ref(), remote);
        match resolution {
            Resolution::Insert => self.store.add_user(remote.clone()).await?,
            Resolution::Replace => self.store.upsert_user(remote.clone()).await?,
            Resolution::Keep => return Ok(resolution),
        }
        if let Some(secret) = secret {
            self.credentials.set_secret(&remote.id, secret.clone()).await?;
        }
        Ok(resolution)
    }

    async fn merge_feedback(&self, items: &[ReplicatedFeedback]) -> MergeReport {
        let mut report = MergeReport::default();
        for remote in items {
            match self.merge_item(remote).await {
                Ok(resolution) => report.record(resolution),
                Err(e) => {
                    tracing::warn!("Failed to merge feedback {}: {}", remote.id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn merge_item(&self, remote: &ReplicatedFeedback) -> Result<Resolution, StoreError> {
        let local = self.store.get_feedback(&remote.id).await?;
        let resolution = resolve(local.as_ref(), remote);
        match resolution {
            Resolution::Insert => self.store.add_feedback(remote.clone()).await?,
            Resolution::Replace => self.store.upsert_feedback(remote.clone()).await?,
            Resolution::Keep => {}
        }
        Ok(resolution)
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("directory", &self.directory)
            .finish()
    }
}
