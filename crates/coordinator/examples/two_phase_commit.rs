//! Example walking a session through a two-phase commit and a recovery
//!
//! Three in-memory shards stand in for real primaries. The first commit goes
//! through cleanly; the second loses the StartCommit reply, and the resolver
//! then finishes it from the metadata manager's record.
//!
//! Run with: cargo run --example two_phase_commit

use shardgate_common::{ErrorCode, Target};
use shardgate_coordinator::{Coordinator, CoordinatorConfig, TransactionMode};
use shardgate_sandbox::{SandboxCluster, Verb};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Two-Phase Commit Example ===\n");

    // 1. Three shards of one keyspace
    let cluster = Arc::new(SandboxCluster::new());
    let shards: Vec<_> = (0..3)
        .map(|i| cluster.add_shard("commerce", &i.to_string()))
        .collect();
    let targets: Vec<_> = (0..3)
        .map(|i| Target::primary("commerce", i.to_string()))
        .collect();
    println!("✓ Created {} sandbox shards", shards.len());

    // 2. Coordinator whose sessions use two-phase commit
    let config = CoordinatorConfig {
        transaction_mode: TransactionMode::Twopc,
        ..Default::default()
    };
    let coordinator = Coordinator::new(cluster.clone(), config)?;

    // 3. A transaction writing to every shard
    let mut session = coordinator.new_session();
    coordinator.begin(&mut session, &[]).await?;
    for target in &targets {
        coordinator.begin_on_shard(&mut session, target, true).await?;
    }
    println!("✓ Opened transactions on {} shards", session.record_count());

    coordinator.commit(&mut session).await?;
    println!(
        "✓ Committed: {} prepared, {} committed on resource managers",
        shards[1].count(Verb::Prepare) + shards[2].count(Verb::Prepare),
        shards[1].count(Verb::CommitPrepared) + shards[2].count(Verb::CommitPrepared)
    );

    // 4. Same again, but the commit decision's reply is lost
    coordinator.begin(&mut session, &[]).await?;
    for target in &targets {
        coordinator.begin_on_shard(&mut session, target, true).await?;
    }
    shards[0].fail_next_after_apply(Verb::StartCommit, ErrorCode::DeadlineExceeded);

    match coordinator.commit(&mut session).await {
        Ok(()) => println!("✗ Expected the commit to report an error"),
        Err(e) => println!("✓ Commit outcome unknown to the client: {}", e),
    }

    // 5. Recovery reads the metadata manager and rolls the commit forward
    coordinator.resolve_transactions(&targets[0]).await?;
    println!(
        "✓ Resolved: {} prepared branches left on resource managers",
        shards[1].prepared_dtids().len() + shards[2].prepared_dtids().len()
    );

    let snapshot = coordinator.metrics().snapshot();
    println!("\nMetrics: {:?}", snapshot);

    println!("\n=== Example Complete ===");
    Ok(())
}
