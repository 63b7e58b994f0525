//! In-memory store, credential store and authenticator.
//!
//! Allows injecting failures and counting writes for verification.

use super::{Authenticator, CredentialStore, LocalStore, StoreError};
use async_trait::async_trait;
use feedsync_types::{
    FeedbackId, PeerAddress, PeerRecord, ReplicatedFeedback, ReplicatedUser, Secret, UserId,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory implementation of [`LocalStore`] and [`CredentialStore`].
///
/// Cloning shares the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    users: BTreeMap<UserId, ReplicatedUser>,
    feedback: BTreeMap<FeedbackId, ReplicatedFeedback>,
    peers: BTreeMap<PeerAddress, PeerRecord>,
    secrets: BTreeMap<UserId, Secret>,
    writes: usize,
    fail_next_read: Option<String>,
    fail_next_write: Option<String>,
}

impl MemoryStoreInner {
    fn read(&mut self) -> Result<(), StoreError> {
        match self.fail_next_read.take() {
            Some(error) => Err(StoreError::Unavailable(error)),
            None => Ok(()),
        }
    }

    fn write(&mut self) -> Result<(), StoreError> {
        if let Some(error) = self.fail_next_write.take() {
            return Err(StoreError::Unavailable(error));
        }
        self.writes += 1;
        Ok(())
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next read to fail with the given error.
    pub fn fail_next_read(&self, error: &str) {
        self.lock().fail_next_read = Some(error.to_string());
    }

    /// Cause the next write to fail with the given error.
    pub fn fail_next_write(&self, error: &str) {
        self.lock().fail_next_write = Some(error.to_string());
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Snapshot of a feedback record.
    pub fn feedback(&self, id: &FeedbackId) -> Option<ReplicatedFeedback> {
        self.lock().feedback.get(id).cloned()
    }

    /// Snapshot of every feedback record, ordered by id.
    pub fn all_feedback(&self) -> Vec<ReplicatedFeedback> {
        self.lock().feedback.values().cloned().collect()
    }

    /// Snapshot of a user.
    pub fn user(&self, id: &UserId) -> Option<ReplicatedUser> {
        self.lock().users.get(id).cloned()
    }

    /// Snapshot of every user, ordered by id.
    pub fn all_users(&self) -> Vec<ReplicatedUser> {
        self.lock().users.values().cloned().collect()
    }

    /// Snapshot of the secret stored for a user.
    pub fn secret(&self, id: &UserId) -> Option<Secret> {
        self.lock().secrets.get(id).cloned()
    }

    /// Snapshot of every known peer, ordered by address.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.lock().peers.values().cloned().collect()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_user(&self, id: &UserId) -> Result<Option<ReplicatedUser>, StoreError> {
        let mut inner = self.lock();
        inner.read()?;
        Ok(inner.users.get(id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<ReplicatedUser>, StoreError> {
        let mut inner = self.lock();
        inner.read()?;
        Ok(inner.users.values().cloned().collect())
    }

    async fn add_user(&self, user: ReplicatedUser) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.users.contains_key(&user.id) {
            return Err(StoreError::AlreadyExists(user.id.to_string()));
        }
        inner.write()?;
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn upsert_user(&self, user: ReplicatedUser) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.write()?;
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn get_feedback(
        &self,
        id: &FeedbackId,
    ) -> Result<Option<ReplicatedFeedback>, StoreError> {
        let mut inner = self.lock();
        inner.read()?;
        Ok(inner.feedback.get(id).cloned())
    }

    async fn list_feedback(&self) -> Result<Vec<ReplicatedFeedback>, StoreError> {
        let mut inner = self.lock();
        inner.read()?;
        Ok(inner.feedback.values().cloned().collect())
    }

    async fn add_feedback(&self, item: ReplicatedFeedback) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.feedback.contains_key(&item.id) {
            return Err(StoreError::AlreadyExists(item.id.to_string()));
        }
        inner.write()?;
        inner.feedback.insert(item.id, item);
        Ok(())
    }

    async fn upsert_feedback(&self, item: ReplicatedFeedback) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.write()?;
        inner.feedback.insert(item.id, item);
        Ok(())
    }

    async fn list_peers(&self) -> Result<Vec<PeerRecord>, StoreError> {
        let mut inner = self.lock();
        inner.read()?;
        Ok(inner.peers.values().cloned().collect())
    }

    async fn upsert_peer(&self, peer: PeerRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.write()?;
        inner.peers.insert(peer.peer_address.clone(), peer);
        Ok(())
    }

    async fn remove_peer(&self, address: &PeerAddress) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.write()?;
        Ok(inner.peers.remove(address).is_some())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_secret(&self, user: &UserId) -> Result<Option<Secret>, StoreError> {
        let mut inner = self.lock();
        inner.read()?;
        Ok(inner.secrets.get(user).cloned())
    }

    async fn set_secret(&self, user: &UserId, secret: Secret) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.write()?;
        inner.secrets.insert(*user, secret);
        Ok(())
    }
}

/// Authenticator whose signed-in user is set by hand.
#[derive(Clone, Debug, Default)]
pub struct StaticAuth {
    user: Arc<Mutex<Option<UserId>>>,
}

impl StaticAuth {
    /// Authenticator with `user` signed in.
    pub fn signed_in(user: UserId) -> Self {
        let auth = Self::default();
        auth.sign_in(user);
        auth
    }

    /// Authenticator with nobody signed in.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Sign `user` in.
    pub fn sign_in(&self, user: UserId) {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    /// Sign out.
    pub fn sign_out(&self) {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Authenticator for StaticAuth {
    fn current_user_id(&self) -> Option<UserId> {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
