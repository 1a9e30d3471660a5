//! Shared fixture: a sandbox cluster of numbered shards behind a coordinator

#![allow(dead_code)]

use shardgate_common::Target;
use shardgate_coordinator::{
    CommitOrder, Coordinator, CoordinatorConfig, Session, ShardSession, TransactionMode,
};
use shardgate_sandbox::{SandboxCluster, SandboxShard};
use std::sync::Arc;

pub const KEYSPACE: &str = "TestTxConn";

pub struct TestCluster {
    pub cluster: Arc<SandboxCluster>,
    pub shards: Vec<Arc<SandboxShard>>,
    pub coordinator: Coordinator,
}

impl TestCluster {
    /// `count` shards named "0", "1", ... under the default configuration
    pub fn new(count: usize) -> Self {
        Self::with_config(count, CoordinatorConfig::default())
    }

    pub fn with_config(count: usize, config: CoordinatorConfig) -> Self {
        let cluster = Arc::new(SandboxCluster::new());
        let shards = (0..count)
            .map(|i| cluster.add_shard(KEYSPACE, &i.to_string()))
            .collect();
        let coordinator = Coordinator::new(cluster.clone(), config).unwrap();
        Self {
            cluster,
            shards,
            coordinator,
        }
    }

    pub fn target(&self, index: usize) -> Target {
        Target::primary(KEYSPACE, index.to_string())
    }

    /// Session with Begin already issued
    pub async fn begin(&self, mode: TransactionMode) -> Session {
        let mut session = Session::new(mode);
        self.coordinator.begin(&mut session, &[]).await.unwrap();
        session
    }

    /// Touch each shard in `indexes` with a write in the session's current class
    pub async fn touch(&self, session: &mut Session, indexes: &[usize]) {
        for &index in indexes {
            self.coordinator
                .begin_on_shard(session, &self.target(index), true)
                .await
                .unwrap();
        }
    }

    /// Touch `index` in `order`, then switch the session back to `normal`
    pub async fn touch_in(&self, session: &mut Session, order: CommitOrder, index: usize) {
        session.set_commit_order(order);
        self.touch(session, &[index]).await;
        session.set_commit_order(CommitOrder::Normal);
    }

    /// Put the session in reserved-connection mode with a reserved connection on each shard
    pub fn reserve(&self, session: &mut Session, indexes: &[usize]) {
        session.in_reserved_conn = true;
        for &index in indexes {
            let shard = &self.shards[index];
            let record = ShardSession::new(self.target(index))
                .with_reserved(shard.reserve())
                .with_alias(shard.alias());
            session
                .append_or_update(record, CommitOrder::Normal)
                .unwrap();
        }
    }
}

/// Error text the sandbox reports for an injected failure on shard `index`
pub fn shard_error(index: usize, code: &str) -> String {
    format!("target: {}.{}.primary: {} error", KEYSPACE, index, code)
}
