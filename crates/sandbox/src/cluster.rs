//! Sandbox cluster routing backend calls to in-memory shards

use crate::call_log::{CallLog, CallPhase, Verb};
use crate::shard::SandboxShard;
use async_trait::async_trait;
use parking_lot::Mutex;
use shardgate_common::{
    BeginReply, ErrorCode, QueryService, RpcError, RpcResult, TabletAlias, Target,
    TransactionMetadata,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Set of sandbox shards reachable through one [`QueryService`]
pub struct SandboxCluster {
    /// Shards by target
    shards: Mutex<HashMap<Target, Arc<SandboxShard>>>,

    /// Call log shared by every shard
    log: CallLog,

    /// Next tablet uid handed out by `add_shard`
    next_uid: Mutex<u32>,
}

impl Default for SandboxCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self {
            shards: Mutex::new(HashMap::new()),
            log: CallLog::new(),
            next_uid: Mutex::new(100),
        }
    }

    /// Add a primary for `keyspace/shard`, replacing any previous one
    pub fn add_shard(&self, keyspace: &str, shard: &str) -> Arc<SandboxShard> {
        let alias = {
            let mut uid = self.next_uid.lock();
            let alias = TabletAlias::new("zone1", *uid);
            *uid += 1;
            alias
        };
        let target = Target::primary(keyspace, shard);
        let sandbox = Arc::new(SandboxShard::new(target.clone(), alias));
        self.shards.lock().insert(target, sandbox.clone());
        sandbox
    }

    /// Look up the shard serving `target`
    pub fn shard(&self, target: &Target) -> Option<Arc<SandboxShard>> {
        self.shards.lock().get(target).cloned()
    }

    pub fn call_log(&self) -> &CallLog {
        &self.log
    }

    /// Route one call: count it, log it, apply it
    async fn call<T, F>(&self, target: &Target, verb: Verb, apply: F) -> RpcResult<T>
    where
        F: FnOnce(&SandboxShard) -> RpcResult<T> + Send,
        T: Send,
    {
        let shard = self.shard(target).ok_or_else(|| {
            RpcError::new(
                ErrorCode::Unavailable,
                format!("no healthy tablet available for '{}'", target),
            )
        })?;

        shard.record_call(verb);
        self.log.push(target, verb, CallPhase::Start);

        if let Some(delay) = shard.delay() {
            tokio::time::sleep(delay).await;
        }

        let result = shard.serve(verb, apply);
        self.log.push(target, verb, CallPhase::End);
        result
    }
}

#[async_trait]
impl QueryService for SandboxCluster {
    async fn begin(&self, target: &Target, reserved_id: u64) -> RpcResult<BeginReply> {
        self.call(target, Verb::Begin, |shard| {
            let (transaction_id, reserved_id) = shard.begin(reserved_id)?;
            Ok(BeginReply {
                transaction_id,
                reserved_id,
                tablet_alias: shard.alias(),
            })
        })
        .await
    }

    async fn commit(&self, target: &Target, transaction_id: u64) -> RpcResult<u64> {
        self.call(target, Verb::Commit, |shard| shard.commit(transaction_id))
            .await
    }

    async fn rollback(&self, target: &Target, transaction_id: u64) -> RpcResult<u64> {
        self.call(target, Verb::Rollback, |shard| shard.rollback(transaction_id))
            .await
    }

    async fn prepare(&self, target: &Target, transaction_id: u64, dtid: &str) -> RpcResult<()> {
        self.call(target, Verb::Prepare, |shard| {
            shard.prepare(transaction_id, dtid)
        })
        .await
    }

    async fn commit_prepared(&self, target: &Target, dtid: &str) -> RpcResult<()> {
        self.call(target, Verb::CommitPrepared, |shard| {
            shard.commit_prepared(dtid)
        })
        .await
    }

    async fn rollback_prepared(
        &self,
        target: &Target,
        dtid: &str,
        original_id: u64,
    ) -> RpcResult<()> {
        self.call(target, Verb::RollbackPrepared, |shard| {
            shard.rollback_prepared(dtid, original_id)
        })
        .await
    }

    async fn create_transaction(
        &self,
        target: &Target,
        dtid: &str,
        participants: &[Target],
    ) -> RpcResult<()> {
        self.call(target, Verb::CreateTransaction, |shard| {
            shard.create_transaction(dtid, participants)
        })
        .await
    }

    async fn start_commit(
        &self,
        target: &Target,
        transaction_id: u64,
        dtid: &str,
    ) -> RpcResult<()> {
        self.call(target, Verb::StartCommit, |shard| {
            shard.start_commit(transaction_id, dtid)
        })
        .await
    }

    async fn set_rollback(
        &self,
        target: &Target,
        dtid: &str,
        transaction_id: u64,
    ) -> RpcResult<()> {
        self.call(target, Verb::SetRollback, |shard| {
            shard.set_rollback(dtid, transaction_id)
        })
        .await
    }

    async fn conclude_transaction(&self, target: &Target, dtid: &str) -> RpcResult<()> {
        self.call(target, Verb::ConcludeTransaction, |shard| {
            shard.conclude_transaction(dtid)
        })
        .await
    }

    async fn unresolved_transactions(
        &self,
        target: &Target,
        _abandon_age: Duration,
    ) -> RpcResult<Vec<TransactionMetadata>> {
        self.call(target, Verb::UnresolvedTransactions, |shard| {
            shard.unresolved_transactions()
        })
        .await
    }

    async fn release(
        &self,
        target: &Target,
        transaction_id: u64,
        reserved_id: u64,
    ) -> RpcResult<()> {
        self.call(target, Verb::Release, |shard| {
            shard.release(transaction_id, reserved_id)
        })
        .await
    }
}
