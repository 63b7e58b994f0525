//! # sync-core
//!
//! Pure logic for feedsync (no I/O, instant tests).
//!
//! This crate implements the decision rules and the status state machine for
//! peer replication without any network or storage I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`merge`] decides, per record, whether an incoming copy wins
//! - [`directory`] decides which known peers are fresh enough to dial
//! - [`state`] turns lifecycle events into a new [`SyncState`] plus [`Action`]s
//!
//! The actual I/O (transport sessions, store writes, timers) is performed by
//! `sync-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod directory;
pub mod merge;
pub mod state;

pub use directory::{is_fresh, prune_stale, reconnect_candidates, PEER_FRESHNESS_WINDOW};
pub use merge::{resolve, Resolution, Versioned};
pub use state::{
    Action, Event, SyncMachine, SyncState, RETRY_BACKOFF, SETTLE_DELAY, SYNC_INTERVAL,
};
