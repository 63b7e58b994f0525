//! Peer freshness rules.
//!
//! Known peers are only worth dialing if they were seen recently. A record
//! is fresh while `last_seen` is strictly after `now - window`.

use feedsync_types::{PeerAddress, PeerRecord, Timestamp};
use std::time::Duration;

/// How long a peer stays eligible for reconnection after its last handshake.
pub const PEER_FRESHNESS_WINDOW: Duration = Duration::from_millis(3_600_000);

/// Whether `record` was seen within `window` of `now`.
pub fn is_fresh(record: &PeerRecord, now: Timestamp, window: Duration) -> bool {
    record.last_seen > now.saturating_sub(window)
}

/// Keep only the records that are still fresh.
pub fn prune_stale(records: Vec<PeerRecord>, now: Timestamp, window: Duration) -> Vec<PeerRecord> {
    records
        .into_iter()
        .filter(|record| is_fresh(record, now, window))
        .collect()
}

/// Addresses to dial: fresh records other than our own address.
pub fn reconnect_candidates(
    records: Vec<PeerRecord>,
    self_address: &PeerAddress,
    now: Timestamp,
    window: Duration,
) -> Vec<PeerAddress> {
    prune_stale(records, now, window)
        .into_iter()
        .map(|record| record.peer_address)
        .filter(|address| address != self_address)
        .collect()
}
