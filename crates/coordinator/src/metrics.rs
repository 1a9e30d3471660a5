//! In-process counters for commit outcomes and recovery.
//!
//! Counters are lock-free except the per-shape table, which is touched once
//! per Commit.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// How many shards a committed transaction spanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShardSpan {
    Single,
    Cross,
}

/// Whether a committed transaction wrote anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TxKind {
    ReadOnly,
    ReadWrite,
}

/// Shape key of the transactions-processed counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxShape {
    pub span: ShardSpan,
    pub kind: TxKind,
}

impl fmt::Display for TxShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let span = match self.span {
            ShardSpan::Single => "Single",
            ShardSpan::Cross => "Cross",
        };
        let kind = match self.kind {
            TxKind::ReadOnly => "ReadOnly",
            TxKind::ReadWrite => "ReadWrite",
        };
        write!(f, "{}.{}", span, kind)
    }
}

/// Aggregated coordinator counters
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    /// Commits by transaction shape.
    transactions_processed: Mutex<BTreeMap<TxShape, u64>>,
    /// Commits that gave up atomicity and left some shards committed.
    non_atomic_commits: AtomicU64,
    /// Two-phase commits that left metadata for the resolver.
    commit_unresolved: AtomicU64,
    /// Transactions the resolver drove to a terminal outcome.
    resolved_transactions: AtomicU64,
    /// Transactions the resolver failed to resolve.
    unresolved_transactions: AtomicU64,
}

/// Immutable snapshot view of [`CoordinatorMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorMetricsSnapshot {
    /// Commits keyed by shape, e.g. `Cross.ReadWrite`.
    pub transactions_processed: BTreeMap<String, u64>,
    pub non_atomic_commits: u64,
    pub commit_unresolved: u64,
    pub resolved_transactions: u64,
    pub unresolved_transactions: u64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self, shape: TxShape) {
        *self.transactions_processed.lock().entry(shape).or_insert(0) += 1;
    }

    pub fn record_non_atomic_commit(&self) {
        self.non_atomic_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_unresolved(&self) {
        self.commit_unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolved(&self) {
        self.resolved_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresolved(&self) {
        self.unresolved_transactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count of commits with `shape`
    pub fn processed(&self, shape: TxShape) -> u64 {
        self.transactions_processed
            .lock()
            .get(&shape)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> CoordinatorMetricsSnapshot {
        CoordinatorMetricsSnapshot {
            transactions_processed: self
                .transactions_processed
                .lock()
                .iter()
                .map(|(shape, count)| (shape.to_string(), *count))
                .collect(),
            non_atomic_commits: self.non_atomic_commits.load(Ordering::Relaxed),
            commit_unresolved: self.commit_unresolved.load(Ordering::Relaxed),
            resolved_transactions: self.resolved_transactions.load(Ordering::Relaxed),
            unresolved_transactions: self.unresolved_transactions.load(Ordering::Relaxed),
        }
    }
}
