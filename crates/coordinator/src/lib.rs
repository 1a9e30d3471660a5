//! Distributed transaction coordinator for a sharded database router
//!
//! This crate tracks per-shard transaction handles for a logical client
//! session and commits, rolls back or releases them across shards:
//! - [`Session`] holds the shard sessions, split into pre / normal / post
//!   commit-order classes
//! - [`fanout`] runs one operation per shard concurrently
//! - [`Coordinator`] drives Begin / Commit / Rollback / Release, including
//!   two-phase commit and recovery of in-doubt transactions

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod resolver;
pub mod session;
pub mod twopc;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, Result};
pub use metrics::{CoordinatorMetrics, CoordinatorMetricsSnapshot, ShardSpan, TxKind, TxShape};
pub use session::{
    AccessMode, CommitOrder, ER_NON_ATOMIC_COMMIT, Session, ShardSession, TransactionMode, Warning,
};
pub use twopc::{CommitPlan, Participant, Role};
