//! Two-replica convergence over the in-memory network.
//!
//! Each test builds real engines sharing one [`MemoryNetwork`] and lets
//! them discover each other through the peer directory, the same way
//! devices do after a first contact.

use feedsync_client::{
    Connectivity, CredentialStore, EngineConfig, EventKind, LocalStore, MemoryNetwork,
    MemoryStore, StaticAuth, SyncEngine, SyncEvent, SyncState,
};
use feedsync_types::{
    FeedbackEdit, FeedbackKind, PeerAddress, PeerRecord, ReplicatedFeedback, ReplicatedUser,
    Secret, Timestamp,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

struct Replica {
    engine: SyncEngine<MemoryNetwork>,
    store: MemoryStore,
    user: ReplicatedUser,
    online: watch::Sender<Connectivity>,
    received: Arc<Mutex<Vec<PeerAddress>>>,
}

impl Replica {
    async fn new(network: &MemoryNetwork, name: &str) -> Self {
        let store = MemoryStore::new();
        let user = ReplicatedUser::new(
            name,
            format!("{name}@example.com"),
            Timestamp::from_millis(1),
        );
        store.add_user(user.clone()).await.unwrap();

        let (online, connectivity) = watch::channel(Connectivity::Online);
        let shared = Arc::new(store.clone());
        let engine = SyncEngine::new(
            EngineConfig::default(),
            network.clone(),
            shared.clone(),
            shared,
            Arc::new(StaticAuth::signed_in(user.id)),
            connectivity,
        );

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        engine.events().subscribe(EventKind::DataReceived, move |event| {
            if let SyncEvent::DataReceived { peer, .. } = event {
                sink.lock().unwrap().push(peer.clone());
            }
        });

        Self {
            engine,
            store,
            user,
            online,
            received,
        }
    }

    async fn address(&self) -> PeerAddress {
        self.engine.self_address().await.unwrap()
    }

    async fn knows(&self, other: &Replica) {
        let record = PeerRecord::new(
            other.address().await,
            &other.user.username,
            Timestamp::now(),
        );
        self.store.upsert_peer(record).await.unwrap();
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn pair(network: &MemoryNetwork) -> (Replica, Replica) {
    let alice = Replica::new(network, "alice").await;
    let bob = Replica::new(network, "bob").await;
    (alice, bob)
}

/// Start `alice` first, then `bob`, which learns alice's address and dials.
async fn connect(alice: &Replica, bob: &Replica) {
    alice.engine.init().await;
    settle().await;
    bob.engine.init().await;
    settle().await;
    bob.knows(alice).await;
    bob.engine.sync_now().await;
    settle().await;
}

fn shared_feedback(author: &ReplicatedUser) -> ReplicatedFeedback {
    ReplicatedFeedback::new(
        FeedbackKind::Bug,
        "Crash on launch",
        "Opening the app crashes",
        author,
        Timestamp::from_millis(100),
    )
}

#[tokio::test(start_paused = true)]
async fn concurrent_edits_converge_to_latest() {
    let network = MemoryNetwork::new();
    let (alice, bob) = pair(&network).await;

    let original = shared_feedback(&alice.user);
    alice.store.add_feedback(original.clone()).await.unwrap();
    bob.store.add_feedback(original.clone()).await.unwrap();

    // Offline edits: Alice upvotes at 200, Bob retitles at 150
    let mut upvoted = original.clone();
    upvoted.toggle_upvote(alice.user.id, Timestamp::from_millis(200));
    alice.store.upsert_feedback(upvoted.clone()).await.unwrap();

    let mut retitled = original.clone();
    retitled.edit(
        FeedbackEdit {
            title: Some("Crash at startup".into()),
            ..FeedbackEdit::default()
        },
        Timestamp::from_millis(150),
    );
    bob.store.upsert_feedback(retitled).await.unwrap();

    connect(&alice, &bob).await;

    let on_alice = alice.store.feedback(&original.id).unwrap();
    let on_bob = bob.store.feedback(&original.id).unwrap();
    assert_eq!(on_alice, upvoted);
    assert_eq!(on_bob, upvoted);
    assert_eq!(on_bob.title, "Crash on launch");
    assert_eq!(on_bob.upvote_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn one_sided_records_are_copied_with_secrets() {
    let network = MemoryNetwork::new();
    let (alice, bob) = pair(&network).await;
    alice
        .store
        .set_secret(&alice.user.id, Secret::new("alice-secret"))
        .await
        .unwrap();
    let only_alice = shared_feedback(&alice.user);
    alice.store.add_feedback(only_alice.clone()).await.unwrap();

    connect(&alice, &bob).await;

    assert_eq!(bob.store.feedback(&only_alice.id), Some(only_alice));
    assert_eq!(bob.store.user(&alice.user.id), Some(alice.user.clone()));
    assert_eq!(alice.store.user(&bob.user.id), Some(bob.user.clone()));
    assert_eq!(
        bob.store.secret(&alice.user.id),
        Some(Secret::new("alice-secret"))
    );
    assert_eq!(alice.store.all_users().len(), 2);
    assert_eq!(bob.store.all_users().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn equal_timestamps_keep_local_copies() {
    let network = MemoryNetwork::new();
    let (alice, bob) = pair(&network).await;

    let original = shared_feedback(&alice.user);
    let mut theirs = original.clone();
    theirs.title = "Different title, same time".into();
    alice.store.add_feedback(original.clone()).await.unwrap();
    bob.store.add_feedback(theirs.clone()).await.unwrap();

    connect(&alice, &bob).await;

    assert_eq!(alice.store.feedback(&original.id), Some(original));
    assert_eq!(bob.store.feedback(&theirs.id), Some(theirs));
}

#[tokio::test(start_paused = true)]
async fn repeated_sync_changes_nothing() {
    let network = MemoryNetwork::new();
    let (alice, bob) = pair(&network).await;
    alice
        .store
        .add_feedback(shared_feedback(&alice.user))
        .await
        .unwrap();

    connect(&alice, &bob).await;
    let alice_before = alice.store.all_feedback();
    let bob_before = bob.store.all_feedback();

    alice.engine.sync_now().await;
    bob.engine.sync_now().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(alice.store.all_feedback(), alice_before);
    assert_eq!(bob.store.all_feedback(), bob_before);
    assert_eq!(alice_before, bob_before);
    assert_eq!(alice.engine.sync_status(), SyncState::Synced);
    assert_eq!(bob.engine.sync_status(), SyncState::Synced);
}

#[tokio::test(start_paused = true)]
async fn sessions_are_symmetric() {
    let network = MemoryNetwork::new();
    let (alice, bob) = pair(&network).await;

    connect(&alice, &bob).await;

    assert_eq!(alice.engine.open_sessions().await, vec![bob.address().await]);
    assert_eq!(bob.engine.open_sessions().await, vec![alice.address().await]);

    // Both sides receive the full snapshot from the other
    let from_bob = alice.received.lock().unwrap().clone();
    let from_alice = bob.received.lock().unwrap().clone();
    assert!(from_bob.len() >= 3);
    assert!(from_alice.len() >= 3);
    assert!(from_bob.iter().all(|peer| peer.belongs_to(&bob.user.id)));
    assert!(from_alice.iter().all(|peer| peer.belongs_to(&alice.user.id)));
}

#[tokio::test(start_paused = true)]
async fn offline_edits_reach_peer_after_reconnect() {
    let network = MemoryNetwork::new();
    let (alice, bob) = pair(&network).await;
    let feedback = shared_feedback(&alice.user);
    alice.store.add_feedback(feedback.clone()).await.unwrap();
    connect(&alice, &bob).await;
    let first_address = alice.address().await;

    alice.online.send(Connectivity::Offline).unwrap();
    settle().await;
    assert_eq!(alice.engine.sync_status(), SyncState::Offline);
    assert!(bob.engine.open_sessions().await.is_empty());

    let mut edited = feedback.clone();
    edited.toggle_upvote(alice.user.id, Timestamp::from_millis(500));
    alice.store.upsert_feedback(edited.clone()).await.unwrap();

    // Bob's address was learned from the user-info payload
    alice.online.send(Connectivity::Online).unwrap();
    settle().await;

    assert_eq!(alice.engine.sync_status(), SyncState::Synced);
    assert_ne!(alice.address().await, first_address);
    assert_eq!(bob.store.feedback(&feedback.id), Some(edited));
}

#[tokio::test(start_paused = true)]
async fn destroy_disconnects_peer() {
    let network = MemoryNetwork::new();
    let (alice, bob) = pair(&network).await;
    connect(&alice, &bob).await;

    alice.engine.destroy().await;
    settle().await;

    assert_eq!(alice.engine.sync_status(), SyncState::Offline);
    assert!(bob.engine.open_sessions().await.is_empty());
    assert_eq!(network.endpoints(), vec![bob.address().await]);
}
