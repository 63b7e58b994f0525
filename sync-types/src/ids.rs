//! Identity and ordering types for feedsync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::SyncError;

/// Length of the random suffix appended to a user id to form a peer address.
const ADDRESS_SUFFIX_LEN: usize = 8;

/// A unique identifier for a user account.
///
/// UUID v4 format, serialized as its hyphenated string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(uuid::Uuid);

impl UserId {
    /// Create a new random UserId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for UserId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SyncError::InvalidId(s.to_string()))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// A unique identifier for a feedback record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(uuid::Uuid);

impl FeedbackId {
    /// Create a new random FeedbackId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for FeedbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for FeedbackId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SyncError::InvalidId(s.to_string()))
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedbackId({})", self.0)
    }
}

/// The transport-level address of a replica.
///
/// Formed as `{userId}-{suffix}` so that several devices signed in to the
/// same account are distinct endpoints that still trace back to one user.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Derive a fresh address for the given user.
    ///
    /// The suffix is the first 8 characters of a random v4 UUID, so every
    /// call yields a new address.
    pub fn generate(user_id: &UserId) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", user_id, &random[..ADDRESS_SUFFIX_LEN]))
    }

    /// Wrap an address received from the transport or the directory.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The user-id part of the address (everything before the last `-`).
    ///
    /// Returns `None` for addresses that were not produced by [`generate`](Self::generate).
    pub fn user_part(&self) -> Option<&str> {
        self.0
            .rsplit_once('-')
            .filter(|(_, suffix)| suffix.len() == ADDRESS_SUFFIX_LEN)
            .map(|(user, _)| user)
    }

    /// Whether this address belongs to the given user.
    pub fn belongs_to(&self, user_id: &UserId) -> bool {
        self.user_part() == Some(user_id.to_string().as_str())
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({})", self.0)
    }
}

/// Wall-clock time in milliseconds since the Unix epoch.
///
/// The sole ordering key for conflict resolution: `createdAt` for users,
/// `lastModified` for feedback, `lastSeen` for peers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a Timestamp from milliseconds since the epoch.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(elapsed.as_millis() as u64)
    }

    /// Milliseconds since the epoch.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// This timestamp moved back by `duration`, clamped at the epoch.
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_millis() as u64))
    }

    /// This timestamp moved forward by `duration`.
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_is_uuid_v4() {
        let id = UserId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn user_id_parses_from_display() {
        let id = UserId::new();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_feedback_id_is_rejected() {
        let result = "f1".parse::<FeedbackId>();
        assert!(matches!(result, Err(SyncError::InvalidId(s)) if s == "f1"));
    }

    #[test]
    fn peer_address_embeds_user_id() {
        let user = UserId::new();
        let address = PeerAddress::generate(&user);

        assert!(address.as_str().starts_with(&user.to_string()));
        assert_eq!(address.as_str().len(), user.to_string().len() + 1 + 8);
        assert_eq!(address.user_part(), Some(user.to_string().as_str()));
        assert!(address.belongs_to(&user));
        assert!(!address.belongs_to(&UserId::new()));
    }

    #[test]
    fn peer_addresses_for_same_user_differ() {
        let user = UserId::new();
        let a = PeerAddress::generate(&user);
        let b = PeerAddress::generate(&user);
        assert_ne!(a, b);
    }

    #[test]
    fn foreign_address_has_no_user_part() {
        assert_eq!(PeerAddress::from("relay").user_part(), None);
        assert_eq!(PeerAddress::from("a-b").user_part(), None);
    }

    #[test]
    fn timestamp_ordering() {
        let t1 = Timestamp::from_millis(100);
        let t2 = Timestamp::from_millis(200);
        assert!(t1 < t2);
    }

    #[test]
    fn timestamp_sub_saturates() {
        let t = Timestamp::from_millis(500);
        assert_eq!(t.saturating_sub(Duration::from_secs(1)), Timestamp::from_millis(0));
        assert_eq!(
            t.saturating_sub(Duration::from_millis(200)),
            Timestamp::from_millis(300)
        );
    }

    #[test]
    fn timestamp_serializes_as_number() {
        let json = serde_json::to_string(&Timestamp::from_millis(42)).unwrap();
        assert_eq!(json, "42");
    }
}
