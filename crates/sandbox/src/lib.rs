//! In-memory shard backends for testing the transaction coordinator
//!
//! This crate provides an in-memory implementation of the backend verb set,
//! with per-verb call counters, failure injection and an ordered call log so
//! that tests can assert exactly which RPCs a commit or recovery issued.

pub mod call_log;
pub mod cluster;
pub mod shard;

pub use call_log::{CallEvent, CallLog, CallPhase, Verb};
pub use cluster::SandboxCluster;
pub use shard::SandboxShard;
