//! Backend RPC verb set
//!
//! Every verb is addressed to one shard target. Transport, pooling and
//! topology discovery live behind implementations of [`QueryService`].

use crate::metadata::TransactionMetadata;
use crate::rpc::RpcResult;
use crate::target::{TabletAlias, Target};
use async_trait::async_trait;
use std::time::Duration;

/// Handles issued by a successful `Begin`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginReply {
    pub transaction_id: u64,
    /// Reserved id to keep using; unchanged when the caller passed one in
    pub reserved_id: u64,
    pub tablet_alias: TabletAlias,
}

/// Transactional verbs consumed by the coordinator
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Open a transaction, on the reserved connection `reserved_id` if non-zero
    async fn begin(&self, target: &Target, reserved_id: u64) -> RpcResult<BeginReply>;

    /// Commit a local transaction; returns the reserved id to keep using
    async fn commit(&self, target: &Target, transaction_id: u64) -> RpcResult<u64>;

    /// Roll back a local transaction; returns the reserved id to keep using
    async fn rollback(&self, target: &Target, transaction_id: u64) -> RpcResult<u64>;

    /// Make a local transaction durable under `dtid` without committing it
    async fn prepare(&self, target: &Target, transaction_id: u64, dtid: &str) -> RpcResult<()>;

    async fn commit_prepared(&self, target: &Target, dtid: &str) -> RpcResult<()>;

    /// Roll back a prepared branch; `original_id` is zero when unknown
    async fn rollback_prepared(
        &self,
        target: &Target,
        dtid: &str,
        original_id: u64,
    ) -> RpcResult<()>;

    /// Record distributed metadata on the metadata manager
    async fn create_transaction(
        &self,
        target: &Target,
        dtid: &str,
        participants: &[Target],
    ) -> RpcResult<()>;

    /// Atomically commit the metadata manager's branch and mark the dtid COMMIT
    async fn start_commit(&self, target: &Target, transaction_id: u64, dtid: &str)
    -> RpcResult<()>;

    /// Roll back the metadata manager's branch and mark the dtid ROLLBACK
    async fn set_rollback(&self, target: &Target, dtid: &str, transaction_id: u64)
    -> RpcResult<()>;

    /// Delete the metadata of a dtid that reached a terminal outcome
    async fn conclude_transaction(&self, target: &Target, dtid: &str) -> RpcResult<()>;

    /// Pending distributed transactions older than `abandon_age`
    async fn unresolved_transactions(
        &self,
        target: &Target,
        abandon_age: Duration,
    ) -> RpcResult<Vec<TransactionMetadata>>;

    /// Drop whichever of the transaction and reserved connection are non-zero
    async fn release(&self, target: &Target, transaction_id: u64, reserved_id: u64)
    -> RpcResult<()>;
}
