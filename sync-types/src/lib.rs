//! # sync-types
//!
//! Data model and wire payloads for feedsync peer replication.
//!
//! This crate provides the foundational types used across all feedsync crates:
//! - [`UserId`], [`FeedbackId`], [`PeerAddress`], [`Timestamp`] - Identity and ordering types
//! - [`ReplicatedUser`], [`ReplicatedFeedback`], [`PeerRecord`] - Replicated records
//! - [`Payload`] - The three protocol payloads exchanged over a session
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod model;
mod payload;

pub use error::SyncError;
pub use ids::{FeedbackId, PeerAddress, Timestamp, UserId};
pub use model::{
    FeedbackEdit, FeedbackKind, PeerRecord, ReplicatedFeedback, ReplicatedUser, Secret,
};
pub use payload::{FeedbackSync, Payload, UserInfo, UsersSync};
