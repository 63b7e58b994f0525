//! Collaborators the engine consumes: the local record store, the
//! credential store and the authentication service.
//!
//! These are external to the engine. [`MemoryStore`] and [`StaticAuth`]
//! are in-process implementations for tests and local simulation.

mod memory;

pub use memory::{MemoryStore, StaticAuth};

use async_trait::async_trait;
use feedsync_types::{
    FeedbackId, PeerAddress, PeerRecord, ReplicatedFeedback, ReplicatedUser, Secret, UserId,
};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `add_*` was called for an id that already exists.
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// The backing store could not serve the request.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Key-indexed record store holding users, feedback and known peers.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Look up a user by id.
    async fn get_user(&self, id: &UserId) -> Result<Option<ReplicatedUser>, StoreError>;

    /// Every known user.
    async fn list_users(&self) -> Result<Vec<ReplicatedUser>, StoreError>;

    /// Insert a user; fails if the id exists.
    async fn add_user(&self, user: ReplicatedUser) -> Result<(), StoreError>;

    /// Insert or overwrite a user.
    async fn upsert_user(&self, user: ReplicatedUser) -> Result<(), StoreError>;

    /// Look up a feedback record by id.
    async fn get_feedback(&self, id: &FeedbackId)
        -> Result<Option<ReplicatedFeedback>, StoreError>;

    /// Every known feedback record.
    async fn list_feedback(&self) -> Result<Vec<ReplicatedFeedback>, StoreError>;

    /// Insert a feedback record; fails if the id exists.
    async fn add_feedback(&self, item: ReplicatedFeedback) -> Result<(), StoreError>;

    /// Insert or overwrite a feedback record.
    async fn upsert_feedback(&self, item: ReplicatedFeedback) -> Result<(), StoreError>;

    /// Every known peer.
    async fn list_peers(&self) -> Result<Vec<PeerRecord>, StoreError>;

    /// Insert a peer or refresh an existing one.
    async fn upsert_peer(&self, peer: PeerRecord) -> Result<(), StoreError>;

    /// Delete a peer. Returns whether it existed.
    async fn remove_peer(&self, address: &PeerAddress) -> Result<bool, StoreError>;
}

/// Opaque per-user secret lookup.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The secret stored for `user`, if any.
    async fn get_secret(&self, user: &UserId) -> Result<Option<Secret>, StoreError>;

    /// Store or replace the secret for `user`.
    async fn set_secret(&self, user: &UserId, secret: Secret) -> Result<(), StoreError>;
}

/// Who is signed in on this replica.
pub trait Authenticator: Send + Sync {
    /// The signed-in user, or `None` when nobody is authenticated.
    fn current_user_id(&self) -> Option<UserId>;
}
