//! Replicated records.
//!
//! Every record carries its own conflict-resolution key; there is no
//! field-level merge, so a record is always replaced as a whole.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{FeedbackId, PeerAddress, Timestamp, UserId};

/// A previously contacted peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// Transport-level address of the peer
    pub peer_address: PeerAddress,
    /// Name the peer announced for itself
    pub display_name: String,
    /// Last successful handshake
    pub last_seen: Timestamp,
}

impl PeerRecord {
    /// Create a new peer record.
    pub fn new(
        peer_address: PeerAddress,
        display_name: impl Into<String>,
        last_seen: Timestamp,
    ) -> Self {
        Self {
            peer_address,
            display_name: display_name.into(),
            last_seen,
        }
    }
}

/// A user account, replicated read-mostly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedUser {
    /// Account identifier
    pub id: UserId,
    /// Display name
    pub username: String,
    /// Login email
    pub email: String,
    /// Creation time; the conflict-resolution key for users
    pub created_at: Timestamp,
}

impl ReplicatedUser {
    /// Create a new account with a fresh id.
    pub fn new(username: impl Into<String>, email: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            email: email.into(),
            created_at,
        }
    }
}

/// Category of a feedback record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    /// Something is broken
    Bug,
    /// Something could be better
    Suggestion,
}

/// A feedback record. Mutable; `last_modified` decides conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedFeedback {
    /// Record identifier
    pub id: FeedbackId,
    /// Bug or suggestion
    pub kind: FeedbackKind,
    /// Short summary
    pub title: String,
    /// Full description
    pub description: String,
    /// Creation time
    pub created_at: Timestamp,
    /// Time of the last edit or vote
    pub last_modified: Timestamp,
    /// Username of the author at creation time
    pub author_display_name: String,
    /// Account that created the record
    pub author_id: UserId,
    /// Accounts that upvoted the record
    pub upvoters: BTreeSet<UserId>,
}

/// Field changes applied by [`ReplicatedFeedback::edit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackEdit {
    /// New category
    pub kind: Option<FeedbackKind>,
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
}

impl ReplicatedFeedback {
    /// Create a new record authored by `author`.
    pub fn new(
        kind: FeedbackKind,
        title: impl Into<String>,
        description: impl Into<String>,
        author: &ReplicatedUser,
        now: Timestamp,
    ) -> Self {
        Self {
            id: FeedbackId::new(),
            kind,
            title: title.into(),
            description: description.into(),
            created_at: now,
            last_modified: now,
            author_display_name: author.username.clone(),
            author_id: author.id,
            upvoters: BTreeSet::new(),
        }
    }

    /// Apply an edit and bump `last_modified`.
    pub fn edit(&mut self, edit: FeedbackEdit, now: Timestamp) {
        if let Some(kind) = edit.kind {
            self.kind = kind;
        }
        if let Some(title) = edit.title {
            self.title = title;
        }
        if let Some(description) = edit.description {
            self.description = description;
        }
        self.last_modified = now;
    }

    /// Add or remove `user`'s upvote and bump `last_modified`.
    ///
    /// Returns `true` if the user now upvotes the record.
    pub fn toggle_upvote(&mut self, user: UserId, now: Timestamp) -> bool {
        let upvoted = if self.upvoters.remove(&user) {
            false
        } else {
            self.upvoters.insert(user);
            true
        };
        self.last_modified = now;
        upvoted
    }

    /// Number of upvotes.
    pub fn upvote_count(&self) -> usize {
        self.upvoters.len()
    }
}

/// An account secret carried alongside `users-sync`.
///
/// Zeroed on drop; never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> ReplicatedUser {
        ReplicatedUser::new("alice", "alice@example.com", Timestamp::from_millis(10))
    }

    #[test]
    fn new_feedback_starts_unmodified() {
        let fb = ReplicatedFeedback::new(
            FeedbackKind::Bug,
            "Crash on save",
            "Saving twice crashes",
            &author(),
            Timestamp::from_millis(100),
        );

        assert_eq!(fb.created_at, fb.last_modified);
        assert_eq!(fb.author_display_name, "alice");
        assert_eq!(fb.upvote_count(), 0);
    }

    #[test]
    fn edit_replaces_given_fields_only() {
        let mut fb = ReplicatedFeedback::new(
            FeedbackKind::Bug,
            "Crash on save",
            "details",
            &author(),
            Timestamp::from_millis(100),
        );

        fb.edit(
            FeedbackEdit {
                title: Some("Crash when saving".into()),
                ..Default::default()
            },
            Timestamp::from_millis(150),
        );

        assert_eq!(fb.title, "Crash when saving");
        assert_eq!(fb.description, "details");
        assert_eq!(fb.kind, FeedbackKind::Bug);
        assert_eq!(fb.last_modified, Timestamp::from_millis(150));
    }

    #[test]
    fn toggle_upvote_adds_then_removes() {
        let voter = UserId::new();
        let mut fb = ReplicatedFeedback::new(
            FeedbackKind::Suggestion,
            "Dark mode",
            "",
            &author(),
            Timestamp::from_millis(100),
        );

        assert!(fb.toggle_upvote(voter, Timestamp::from_millis(200)));
        assert_eq!(fb.upvote_count(), 1);
        assert_eq!(fb.last_modified, Timestamp::from_millis(200));

        assert!(!fb.toggle_upvote(voter, Timestamp::from_millis(300)));
        assert_eq!(fb.upvote_count(), 0);
        assert_eq!(fb.last_modified, Timestamp::from_millis(300));
    }

    #[test]
    fn feedback_uses_camel_case_field_names() {
        let fb = ReplicatedFeedback::new(
            FeedbackKind::Bug,
            "t",
            "d",
            &author(),
            Timestamp::from_millis(1),
        );
        let json = serde_json::to_value(&fb).unwrap();

        for key in [
            "id",
            "kind",
            "title",
            "description",
            "createdAt",
            "lastModified",
            "authorDisplayName",
            "authorId",
            "upvoters",
        ] {
            assert!(json.get(key).is_some(), "missing field {key}");
        }
        assert_eq!(json["kind"], "bug");
    }

    #[test]
    fn peer_record_field_names() {
        let record = PeerRecord::new(PeerAddress::from("u-12345678"), "bob", Timestamp::from_millis(7));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["peerAddress"], "u-12345678");
        assert_eq!(json["displayName"], "bob");
        assert_eq!(json["lastSeen"], 7);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }
}
