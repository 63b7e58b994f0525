//! Protocol payloads for feedsync.
//!
//! Exactly three payload kinds cross a session. They are JSON objects
//! discriminated by a `type` field; field names are part of the
//! compatibility contract between replicas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ReplicatedFeedback, ReplicatedUser, Secret, SyncError, UserId};

/// All possible protocol payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Payload {
    /// Sender announces its identity
    UserInfo(UserInfo),
    /// Full snapshot of the sender's accounts
    UsersSync(UsersSync),
    /// Full snapshot of the sender's feedback records
    FeedbackSync(FeedbackSync),
}

impl Payload {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(SyncError::Deserialization)
    }

    /// The wire name of this payload kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::UserInfo(_) => "user-info",
            Payload::UsersSync(_) => "users-sync",
            Payload::FeedbackSync(_) => "feedback-sync",
        }
    }
}

/// Identity announcement sent first on every push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Human-readable name of the sending replica's user
    pub display_name: String,
}

/// Snapshot of every locally known account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersSync {
    /// All accounts
    pub users: Vec<ReplicatedUser>,
    /// Account secrets keyed by user id (accounts without a secret are absent)
    pub secrets: BTreeMap<UserId, Secret>,
}

/// Snapshot of every locally known feedback record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSync {
    /// All feedback records
    pub items: Vec<ReplicatedFeedback>,
}
