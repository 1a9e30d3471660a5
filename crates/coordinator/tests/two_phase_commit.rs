//! Two-phase commit: happy path, failure at every step and hand-off to the resolver

mod common;

use common::{TestCluster, shard_error};
use shardgate_common::{ErrorCode, TransactionState};
use shardgate_coordinator::{CoordinatorConfig, Session, TransactionMode};
use shardgate_sandbox::Verb;

/// dtid of a commit whose MM is shard 0 with the first transaction it issued
const DTID: &str = "TestTxConn:0:1";

async fn open_twopc(t: &TestCluster, shards: &[usize]) -> Session {
    let mut session = t.begin(TransactionMode::Twopc).await;
    t.touch(&mut session, shards).await;
    session
}

#[tokio::test]
async fn test_twopc_commit() {
    let t = TestCluster::new(3);
    let mut session = open_twopc(&t, &[0, 1, 2]).await;

    t.coordinator.commit(&mut session).await.unwrap();

    let mm = &t.shards[0];
    assert_eq!(mm.count(Verb::CreateTransaction), 1);
    assert_eq!(mm.count(Verb::StartCommit), 1);
    assert_eq!(mm.count(Verb::ConcludeTransaction), 1);
    assert_eq!(mm.count(Verb::Prepare), 0);
    assert_eq!(mm.count(Verb::Commit), 0);
    assert!(mm.metadata(DTID).is_none());

    for rm in &t.shards[1..] {
        assert_eq!(rm.count(Verb::Prepare), 1);
        assert_eq!(rm.count(Verb::CommitPrepared), 1);
        assert_eq!(rm.count(Verb::Commit), 0);
        assert!(rm.prepared_dtids().is_empty());
    }

    for shard in &t.shards {
        assert!(shard.open_transactions().is_empty());
        assert_eq!(shard.count(Verb::Release), 0);
    }
    assert!(!session.in_transaction);
    assert_eq!(session.record_count(), 0);
    assert!(session.warnings.is_empty());
}

#[tokio::test]
async fn test_twopc_metadata_names_rms() {
    let t = TestCluster::new(3);
    let mut session = open_twopc(&t, &[0, 1, 2]).await;
    // Keep the record around so it can be inspected
    t.shards[0].fail_next(Verb::ConcludeTransaction, ErrorCode::Unavailable, 1);

    t.coordinator.commit(&mut session).await.unwrap();

    let metadata = t.shards[0].metadata(DTID).unwrap();
    assert_eq!(metadata.state, TransactionState::Commit);
    assert_eq!(metadata.participants, vec![t.target(1), t.target(2)]);
}

#[tokio::test]
async fn test_twopc_with_one_open_transaction_commits_plainly() {
    let t = TestCluster::new(2);
    let mut session = t.begin(TransactionMode::Twopc).await;
    t.reserve(&mut session, &[1]);
    t.touch(&mut session, &[0]).await;
    assert_eq!(session.record_count(), 2);

    t.coordinator.commit(&mut session).await.unwrap();

    assert_eq!(t.shards[0].count(Verb::Commit), 1);
    assert_eq!(t.shards[0].count(Verb::CreateTransaction), 0);
    assert_eq!(t.shards[1].count(Verb::Prepare), 0);
    assert!(t.shards[0].open_transactions().is_empty());
}

#[tokio::test]
async fn test_create_transaction_failure_rolls_back() {
    let t = TestCluster::new(3);
    let mut session = open_twopc(&t, &[0, 1, 2]).await;
    t.shards[0].fail_next(Verb::CreateTransaction, ErrorCode::InvalidArgument, 1);

    let err = t.coordinator.commit(&mut session).await.unwrap_err();

    assert_eq!(err.to_string(), shard_error(0, "INVALID_ARGUMENT"));
    for shard in &t.shards {
        assert_eq!(shard.count(Verb::Rollback), 1);
        assert_eq!(shard.count(Verb::Prepare), 0);
        assert_eq!(shard.count(Verb::StartCommit), 0);
        assert_eq!(shard.count(Verb::Release), 0);
        assert!(shard.open_transactions().is_empty());
    }
    assert!(!session.in_transaction);
}

#[tokio::test]
async fn test_prepare_failure_unwinds() {
    let t = TestCluster::new(2);
    let mut session = open_twopc(&t, &[0, 1]).await;
    t.shards[1].fail_next(Verb::Prepare, ErrorCode::InvalidArgument, 1);

    let err = t.coordinator.commit(&mut session).await.unwrap_err();

    assert_eq!(err.to_string(), shard_error(1, "INVALID_ARGUMENT"));
    let (mm, rm) = (&t.shards[0], &t.shards[1]);
    assert_eq!(mm.count(Verb::SetRollback), 1);
    assert_eq!(mm.count(Verb::ConcludeTransaction), 1);
    assert_eq!(mm.count(Verb::StartCommit), 0);
    assert_eq!(rm.count(Verb::RollbackPrepared), 0);
    assert_eq!(rm.count(Verb::CommitPrepared), 0);
    assert!(mm.metadata(DTID).is_none());

    // The RM that never prepared still owns a local transaction
    assert_eq!(mm.count(Verb::Release), 0);
    assert_eq!(rm.count(Verb::Release), 1);
    assert!(mm.open_transactions().is_empty());
    assert!(rm.open_transactions().is_empty());
    assert!(!session.in_transaction);
}

#[tokio::test]
async fn test_prepare_failure_rolls_back_prepared_rms_only() {
    let t = TestCluster::new(3);
    let mut session = open_twopc(&t, &[0, 1, 2]).await;
    t.shards[1].fail_next(Verb::Prepare, ErrorCode::Aborted, 1);

    t.coordinator.commit(&mut session).await.unwrap_err();

    assert_eq!(t.shards[1].count(Verb::RollbackPrepared), 0);
    assert_eq!(t.shards[2].count(Verb::RollbackPrepared), 1);
    assert!(t.shards[2].prepared_dtids().is_empty());
    assert_eq!(t.shards[1].count(Verb::Release), 1);
    assert_eq!(t.shards[2].count(Verb::Release), 0);
    assert_eq!(t.coordinator.metrics().snapshot().commit_unresolved, 0);
}

#[tokio::test]
async fn test_set_rollback_failure_leaves_metadata() {
    let t = TestCluster::new(3);
    let mut session = open_twopc(&t, &[0, 1, 2]).await;
    t.shards[2].fail_next(Verb::Prepare, ErrorCode::Aborted, 1);
    t.shards[0].fail_next(Verb::SetRollback, ErrorCode::Unavailable, 1);

    let err = t.coordinator.commit(&mut session).await.unwrap_err();

    assert_eq!(err.to_string(), shard_error(2, "ABORTED"));
    assert_eq!(t.shards[1].count(Verb::RollbackPrepared), 0);
    assert_eq!(t.shards[0].count(Verb::ConcludeTransaction), 0);
    assert_eq!(
        t.shards[0].metadata(DTID).map(|m| m.state),
        Some(TransactionState::Prepare)
    );
    assert_eq!(t.coordinator.metrics().snapshot().commit_unresolved, 1);

    // MM still owns its transaction, so it is released with the failed RM
    assert_eq!(t.shards[0].count(Verb::Release), 1);
    assert_eq!(t.shards[2].count(Verb::Release), 1);

    // The resolver finishes the rollback
    t.coordinator
        .resolve_transactions(&t.target(0))
        .await
        .unwrap();
    assert_eq!(t.shards[1].count(Verb::RollbackPrepared), 1);
    assert!(t.shards[1].prepared_dtids().is_empty());
    assert!(t.shards[0].metadata(DTID).is_none());
}

#[tokio::test]
async fn test_start_commit_definite_failure_unwinds() {
    let t = TestCluster::new(2);
    let mut session = open_twopc(&t, &[0, 1]).await;
    t.shards[0].fail_next(Verb::StartCommit, ErrorCode::InvalidArgument, 1);

    let err = t.coordinator.commit(&mut session).await.unwrap_err();

    assert_eq!(err.to_string(), shard_error(0, "INVALID_ARGUMENT"));
    let (mm, rm) = (&t.shards[0], &t.shards[1]);
    assert_eq!(mm.count(Verb::SetRollback), 1);
    assert_eq!(rm.count(Verb::RollbackPrepared), 1);
    assert_eq!(mm.count(Verb::ConcludeTransaction), 1);
    assert_eq!(rm.count(Verb::CommitPrepared), 0);
    assert!(mm.metadata(DTID).is_none());
    assert!(rm.prepared_dtids().is_empty());
    assert!(mm.open_transactions().is_empty());
    assert_eq!(mm.count(Verb::Release), 0);
    assert_eq!(rm.count(Verb::Release), 0);
    assert_eq!(t.coordinator.metrics().snapshot().commit_unresolved, 0);
}

#[tokio::test]
async fn test_start_commit_uncertain_failure_defers_to_resolver() {
    let t = TestCluster::new(2);
    let mut session = open_twopc(&t, &[0, 1]).await;
    // The decision lands but the reply is lost
    t.shards[0].fail_next_after_apply(Verb::StartCommit, ErrorCode::DeadlineExceeded);

    let err = t.coordinator.commit(&mut session).await.unwrap_err();

    assert_eq!(err.to_string(), shard_error(0, "DEADLINE_EXCEEDED"));
    let (mm, rm) = (&t.shards[0], &t.shards[1]);
    assert_eq!(mm.count(Verb::SetRollback), 0);
    assert_eq!(mm.count(Verb::ConcludeTransaction), 0);
    assert_eq!(rm.count(Verb::RollbackPrepared), 0);
    assert_eq!(rm.count(Verb::CommitPrepared), 0);
    assert_eq!(mm.count(Verb::Release), 0);
    assert_eq!(rm.count(Verb::Release), 0);
    assert_eq!(
        mm.metadata(DTID).map(|m| m.state),
        Some(TransactionState::Commit)
    );
    assert_eq!(rm.prepared_dtids(), vec![DTID.to_string()]);
    assert_eq!(t.coordinator.metrics().snapshot().commit_unresolved, 1);
    assert!(!session.in_transaction);

    t.coordinator
        .resolve_transactions(&t.target(0))
        .await
        .unwrap();

    assert_eq!(rm.count(Verb::CommitPrepared), 1);
    assert!(rm.prepared_dtids().is_empty());
    assert!(mm.metadata(DTID).is_none());
    assert_eq!(t.coordinator.metrics().snapshot().resolved_transactions, 1);
}

#[tokio::test]
async fn test_start_commit_lost_before_apply_resolves_to_rollback() {
    let t = TestCluster::new(2);
    let mut session = open_twopc(&t, &[0, 1]).await;
    t.shards[0].fail_next(Verb::StartCommit, ErrorCode::Unavailable, 1);

    t.coordinator.commit(&mut session).await.unwrap_err();

    let (mm, rm) = (&t.shards[0], &t.shards[1]);
    assert_eq!(
        mm.metadata(DTID).map(|m| m.state),
        Some(TransactionState::Prepare)
    );
    assert_eq!(mm.count(Verb::SetRollback), 0);

    t.coordinator
        .resolve_transactions(&t.target(0))
        .await
        .unwrap();

    assert_eq!(mm.count(Verb::SetRollback), 1);
    assert_eq!(rm.count(Verb::RollbackPrepared), 1);
    assert_eq!(rm.count(Verb::CommitPrepared), 0);
    assert!(mm.open_transactions().is_empty());
    assert!(rm.prepared_dtids().is_empty());
    assert!(mm.metadata(DTID).is_none());
}

#[tokio::test]
async fn test_uncertain_codes_are_configurable() {
    let config = CoordinatorConfig {
        transaction_mode: TransactionMode::Twopc,
        uncertain_start_commit_codes: vec![ErrorCode::Aborted],
        ..Default::default()
    };
    let t = TestCluster::with_config(2, config);
    let mut session = t.coordinator.new_session();
    t.coordinator.begin(&mut session, &[]).await.unwrap();
    t.touch(&mut session, &[0, 1]).await;
    t.shards[0].fail_next(Verb::StartCommit, ErrorCode::DeadlineExceeded, 1);

    t.coordinator.commit(&mut session).await.unwrap_err();

    assert_eq!(t.shards[0].count(Verb::SetRollback), 1);
    assert_eq!(t.shards[1].count(Verb::RollbackPrepared), 1);
    assert_eq!(t.coordinator.metrics().snapshot().commit_unresolved, 0);
}

#[tokio::test]
async fn test_commit_prepared_failure_skips_conclude() {
    let t = TestCluster::new(3);
    let mut session = open_twopc(&t, &[0, 1, 2]).await;
    t.shards[1].fail_next(Verb::CommitPrepared, ErrorCode::InvalidArgument, 1);

    let err = t.coordinator.commit(&mut session).await.unwrap_err();

    assert_eq!(err.to_string(), shard_error(1, "INVALID_ARGUMENT"));
    assert_eq!(t.shards[2].count(Verb::CommitPrepared), 1);
    assert_eq!(t.shards[0].count(Verb::ConcludeTransaction), 0);
    assert_eq!(t.shards[0].count(Verb::SetRollback), 0);
    assert_eq!(
        t.shards[0].metadata(DTID).map(|m| m.state),
        Some(TransactionState::Commit)
    );
    assert_eq!(t.coordinator.metrics().snapshot().commit_unresolved, 1);
    for shard in &t.shards {
        assert_eq!(shard.count(Verb::Release), 0);
    }

    // Rolling forward again is harmless for the RM that already committed
    t.coordinator
        .resolve_transactions(&t.target(0))
        .await
        .unwrap();
    assert_eq!(t.shards[1].count(Verb::CommitPrepared), 2);
    assert!(t.shards[1].prepared_dtids().is_empty());
    assert!(t.shards[0].metadata(DTID).is_none());
}

#[tokio::test]
async fn test_conclude_failure_still_commits() {
    let t = TestCluster::new(2);
    let mut session = open_twopc(&t, &[0, 1]).await;
    t.shards[0].fail_next(Verb::ConcludeTransaction, ErrorCode::InvalidArgument, 1);

    t.coordinator.commit(&mut session).await.unwrap();

    assert_eq!(t.shards[1].count(Verb::CommitPrepared), 1);
    assert!(t.shards[1].prepared_dtids().is_empty());
    assert_eq!(t.coordinator.metrics().snapshot().commit_unresolved, 0);
    assert!(session.warnings.is_empty());
}
