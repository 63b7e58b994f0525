//! Mesh simulation.
//!
//! Every replica creates its own records, learns the addresses of the
//! replicas started before it and asks for a sync. Afterwards every store
//! must hold the same users and feedback.

use anyhow::Result;
use feedsync_client::{EngineConfig, MemoryNetwork};
use feedsync_types::Timestamp;

use crate::replica::{settle, Replica};

/// Run the simulate command.
pub async fn run(config: &EngineConfig, replicas: usize, records: usize) -> Result<()> {
    println!("=== feedsync simulate ===");
    println!("  Replicas: {}", replicas);
    println!("  Records:  {} per replica", records);
    println!();

    let network = MemoryNetwork::new();
    let mut mesh = Vec::with_capacity(replicas);
    for i in 0..replicas {
        let replica = Replica::new(&network, &format!("replica-{}", i), config).await?;
        for n in 0..records {
            replica
                .create_feedback(
                    &format!("Suggestion {} from {}", n, replica.name),
                    "Generated by feedsync simulate",
                    Timestamp::now(),
                )
                .await?;
        }
        let address = replica.start().await?;
        tracing::info!("Started {} at {}", replica.name, address);
        mesh.push(replica);
    }

    for (i, replica) in mesh.iter().enumerate() {
        for earlier in &mesh[..i] {
            replica.introduce(earlier).await?;
        }
    }

    tracing::info!("Requesting sync on {} replicas", mesh.len());
    for replica in &mesh {
        replica.engine.sync_now().await;
    }
    settle(config).await;

    println!(
        "  {:<10} {:<8} {:>8} {:>6} {:>9}",
        "REPLICA", "STATUS", "SESSIONS", "USERS", "FEEDBACK"
    );
    for replica in &mesh {
        println!(
            "  {:<10} {:<8} {:>8} {:>6} {:>9}",
            replica.name,
            replica.engine.sync_status(),
            replica.engine.open_sessions().await.len(),
            replica.store.all_users().len(),
            replica.store.all_feedback().len(),
        );
    }
    println!();

    let expected = replicas * records;
    let reference = mesh[0].store.all_feedback();
    let diverged: Vec<&str> = mesh
        .iter()
        .filter(|replica| {
            replica.store.all_feedback() != reference || replica.store.all_users().len() != replicas
        })
        .map(|replica| replica.name.as_str())
        .collect();

    for replica in &mesh {
        replica.engine.destroy().await;
    }

    if !diverged.is_empty() || reference.len() != expected {
        tracing::warn!("Diverged replicas: {:?}", diverged);
        anyhow::bail!("Replicas diverged: {}", diverged.join(", "));
    }
    tracing::info!("Simulation converged");
    println!("Converged: {} feedback records on every replica", expected);
    Ok(())
}
