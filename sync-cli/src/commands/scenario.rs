//! Offline edit conflict between two replicas.
//!
//! Alice creates a record and both replicas sync it. Alice then drops off
//! the network and upvotes it, while Bob retitles it with an older clock.
//! When Alice comes back the newer write wins on both sides.

use anyhow::{Context, Result};
use feedsync_client::{EngineConfig, LocalStore, MemoryNetwork};
use feedsync_types::{FeedbackEdit, ReplicatedFeedback, Timestamp};

use crate::replica::{deliver, settle, Replica};

/// Run the scenario command.
pub async fn run(config: &EngineConfig) -> Result<()> {
    println!("=== feedsync scenario ===");
    println!();

    let network = MemoryNetwork::new();
    let alice = Replica::new(&network, "alice", config).await?;
    let bob = Replica::new(&network, "bob", config).await?;

    let created = alice
        .create_feedback(
            "Crash on launch",
            "Opening the app crashes",
            Timestamp::from_millis(100),
        )
        .await?;

    let alice_address = alice.start().await?;
    let bob_address = bob.start().await?;
    println!("alice: {}", alice_address);
    println!("bob:   {}", bob_address);
    tracing::info!("Scenario replicas started");

    bob.introduce(&alice).await?;
    bob.engine.sync_now().await;
    settle(config).await;
    show("after first sync", &alice, &bob, &created);

    alice.set_online(false);
    tracing::info!("Taking alice offline");
    deliver().await;
    println!("alice went {}", alice.engine.sync_status());

    let mut upvoted = stored(&alice, &created)?;
    upvoted.toggle_upvote(alice.user.id, Timestamp::from_millis(200));
    alice.store.upsert_feedback(upvoted.clone()).await?;
    println!("alice upvotes at t=200");

    let mut retitled = stored(&bob, &created)?;
    retitled.edit(
        FeedbackEdit {
            title: Some("Crash at startup".into()),
            ..FeedbackEdit::default()
        },
        Timestamp::from_millis(150),
    );
    bob.store.upsert_feedback(retitled).await?;
    println!("bob retitles at t=150");
    println!();

    alice.set_online(true);
    tracing::info!("Bringing alice back online");
    deliver().await;
    alice.engine.sync_now().await;
    settle(config).await;
    show("after reconnect", &alice, &bob, &created);

    let on_alice = stored(&alice, &created)?;
    let on_bob = stored(&bob, &created)?;
    if on_alice != upvoted || on_bob != upvoted {
        anyhow::bail!("Replicas did not converge on the latest write");
    }
    tracing::info!("Scenario converged");
    println!("Converged: both replicas hold alice's upvote (t=200)");

    alice.engine.destroy().await;
    bob.engine.destroy().await;
    Ok(())
}

fn stored(replica: &Replica, record: &ReplicatedFeedback) -> Result<ReplicatedFeedback> {
    replica
        .store
        .feedback(&record.id)
        .with_context(|| format!("{} is missing {}", replica.name, record.id))
}

fn show(label: &str, alice: &Replica, bob: &Replica, record: &ReplicatedFeedback) {
    println!("{}:", label);
    for replica in [alice, bob] {
        match replica.store.feedback(&record.id) {
            Some(feedback) => println!(
                "  {:<6} {:<8} \"{}\" upvotes={} last_modified={}",
                replica.name,
                replica.engine.sync_status(),
                feedback.title,
                feedback.upvote_count(),
                feedback.last_modified.as_millis(),
            ),
            None => println!(
                "  {:<6} {:<8} (missing)",
                replica.name,
                replica.engine.sync_status()
            ),
        }
    }
    println!();
}
