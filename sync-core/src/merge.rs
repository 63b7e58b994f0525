//! Last-writer-wins resolution for replicated records.
//!
//! Each record exposes one timestamp as its version. An incoming copy wins
//! only when its version is strictly greater than the local one; on a tie the
//! local copy is kept untouched. Applying the same snapshot any number of
//! times, in any order, therefore converges to the same state.
//!
//! Resolution is whole-record: concurrent changes to different fields of the
//! same record are not combined, and the older one is discarded.

use feedsync_types::{ReplicatedFeedback, ReplicatedUser, Timestamp};

/// A record that can be resolved by last-writer-wins.
pub trait Versioned {
    /// The timestamp compared during resolution.
    fn version(&self) -> Timestamp;
}

impl Versioned for ReplicatedUser {
    /// Users are append-mostly; the creation time orders them.
    fn version(&self) -> Timestamp {
        self.created_at
    }
}

impl Versioned for ReplicatedFeedback {
    fn version(&self) -> Timestamp {
        self.last_modified
    }
}

/// What to do with an incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No local copy exists; add the incoming one.
    Insert,
    /// The incoming copy is strictly newer; overwrite the local one.
    Replace,
    /// The local copy is as new or newer; leave it alone.
    Keep,
}

impl Resolution {
    /// Whether the store must be written.
    pub fn writes(&self) -> bool {
        !matches!(self, Resolution::Keep)
    }
}

/// Decide whether `remote` should replace `local`.
pub fn resolve<R: Versioned>(local: Option<&R>, remote: &R) -> Resolution {
    match local {
        None => Resolution::Insert,
        Some(local) if remote.version() > local.version() => Resolution::Replace,
        Some(_) => Resolution::Keep,
    }
}
