//! Core coordinator implementation
//!
//! The coordinator drives Begin / Commit / Rollback / Release for a logical
//! session. Commit runs the `pre` class, then the `normal` class (two-phase
//! commit, shard by shard, or all at once), then the `post` class, each class
//! draining completely before the next starts.

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::fanout;
use crate::metrics::{CoordinatorMetrics, ShardSpan, TxKind, TxShape};
use crate::session::{
    AccessMode, CommitOrder, ER_NON_ATOMIC_COMMIT, Session, ShardSession, TransactionMode,
};
use shardgate_common::{QueryService, Target};
use std::sync::Arc;

/// Shards named individually in a non-atomic commit warning
const WARNING_SHARD_LIMIT: usize = 16;

/// Commit one shard's transaction; the returned record carries the renewed reserved id
pub(crate) async fn commit_shard(
    service: Arc<dyn QueryService>,
    mut record: ShardSession,
) -> Result<ShardSession> {
    if record.transaction_id == 0 {
        return Ok(record);
    }
    let reserved_id = service
        .commit(&record.target, record.transaction_id)
        .await
        .map_err(|e| CoordinatorError::shard(&record.target, e))?;
    record.transaction_id = 0;
    record.reserved_id = reserved_id;
    Ok(record)
}

/// Roll back one shard's transaction; the returned record carries the renewed reserved id
pub(crate) async fn rollback_shard(
    service: Arc<dyn QueryService>,
    mut record: ShardSession,
) -> Result<ShardSession> {
    if record.transaction_id == 0 {
        return Ok(record);
    }
    let reserved_id = service
        .rollback(&record.target, record.transaction_id)
        .await
        .map_err(|e| CoordinatorError::shard(&record.target, e))?;
    record.transaction_id = 0;
    record.reserved_id = reserved_id;
    Ok(record)
}

async fn release_shard(service: Arc<dyn QueryService>, record: ShardSession) -> Result<()> {
    service
        .release(&record.target, record.transaction_id, record.reserved_id)
        .await
        .map_err(|e| CoordinatorError::shard(&record.target, e))
}

/// Write fan-out outcomes back into the session slots they were taken from
fn apply_results(
    session: &mut Session,
    slots: Vec<(CommitOrder, usize)>,
    results: Vec<Result<ShardSession>>,
) -> Result<()> {
    let mut errors = Vec::new();
    for ((order, index), result) in slots.into_iter().zip(results) {
        match result {
            Ok(updated) => session.records_mut(order)[index] = updated,
            Err(e) => errors.push(e),
        }
    }
    match CoordinatorError::aggregate(errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Copy out every record of `orders` together with where it came from
fn collect_slots(
    session: &Session,
    orders: &[CommitOrder],
) -> (Vec<(CommitOrder, usize)>, Vec<ShardSession>) {
    let mut slots = Vec::new();
    let mut records = Vec::new();
    for &order in orders {
        for (index, record) in session.records(order).iter().enumerate() {
            slots.push((order, index));
            records.push(record.clone());
        }
    }
    (slots, records)
}

fn non_atomic_warning(committed: &[String]) -> String {
    let mut names: Vec<&str> = committed
        .iter()
        .take(WARNING_SHARD_LIMIT)
        .map(String::as_str)
        .collect();
    if committed.len() > WARNING_SHARD_LIMIT {
        names.push("...");
    }
    format!(
        "multi-db commit failed after committing to {} shards: {}",
        committed.len(),
        names.join(", ")
    )
}

/// Shape of the transaction about to be committed, if it touched any shard
fn transaction_shape(session: &Session) -> Option<TxShape> {
    let open = session
        .all_records()
        .filter(|r| r.transaction_id != 0)
        .count();
    let span = match open {
        0 => return None,
        1 => ShardSpan::Single,
        _ => ShardSpan::Cross,
    };
    let kind = if session.read_write {
        TxKind::ReadWrite
    } else {
        TxKind::ReadOnly
    };
    Some(TxShape { span, kind })
}

/// Distributed transaction coordinator
pub struct Coordinator {
    /// Backend verb set
    pub(crate) service: Arc<dyn QueryService>,

    pub(crate) config: CoordinatorConfig,

    pub(crate) metrics: Arc<CoordinatorMetrics>,
}

impl Coordinator {
    /// Create a new coordinator over `service`
    pub fn new(service: Arc<dyn QueryService>, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            service,
            config,
            metrics: Arc::new(CoordinatorMetrics::new()),
        })
    }

    /// Fresh session using the configured transaction mode
    pub fn new_session(&self) -> Session {
        Session::new(self.config.transaction_mode)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    /// Start a transaction, committing any transaction already open
    pub async fn begin(&self, session: &mut Session, access_mode: &[AccessMode]) -> Result<()> {
        if session.in_transaction {
            self.commit(session).await?;
        }
        session.in_transaction = true;
        session.access_mode = access_mode.to_vec();
        Ok(())
    }

    /// Make sure `target` has an open transaction in the current commit-order class
    ///
    /// Called by the statement path the first time a statement touches a
    /// shard. Later touches of the same shard in the same class reuse the
    /// open transaction.
    pub async fn begin_on_shard(
        &self,
        session: &mut Session,
        target: &Target,
        write: bool,
    ) -> Result<()> {
        if !session.in_transaction {
            return Err(CoordinatorError::NotInTransaction);
        }

        let order = session.commit_order;
        let existing = session.find(target, order).cloned();
        if let Some(record) = &existing
            && record.transaction_id != 0
        {
            session.read_write |= write;
            return Ok(());
        }

        let reserved_id = existing.map(|r| r.reserved_id).unwrap_or(0);
        let reply = self
            .service
            .begin(target, reserved_id)
            .await
            .map_err(|e| CoordinatorError::shard(target, e))?;

        let record = ShardSession::new(target.clone())
            .with_transaction(reply.transaction_id)
            .with_reserved(reply.reserved_id)
            .with_alias(reply.tablet_alias);

        if let Err(e) = session.append_or_update(record, order) {
            // The new transaction is not tracked anywhere; drop it
            if let Err(release_err) = self.service.release(target, reply.transaction_id, 0).await {
                tracing::warn!(
                    "Release of untracked transaction {} on {} failed: {}",
                    reply.transaction_id,
                    target,
                    release_err
                );
            }
            return Err(e);
        }

        session.read_write |= write;
        Ok(())
    }

    /// Commit the session's transaction
    pub async fn commit(&self, session: &mut Session) -> Result<()> {
        if !session.in_transaction {
            return Ok(());
        }

        if let Some(shape) = transaction_shape(session) {
            self.metrics.record_processed(shape);
        }

        let result = if session.record_count() == 1 {
            self.commit_single(session).await
        } else {
            self.commit_phases(session).await
        };

        session.reset_tx();
        result
    }

    /// Exactly one shard touched: no ordering classes or protocol involved
    async fn commit_single(&self, session: &mut Session) -> Result<()> {
        let (slots, records) = collect_slots(session, &CommitOrder::ALL);
        let service = self.service.clone();
        let results = fanout::run(records, move |r| commit_shard(service.clone(), r)).await;

        if let Err(e) = apply_results(session, slots, results) {
            self.release_after_failure(session).await;
            return Err(e);
        }
        Ok(())
    }

    async fn commit_phases(&self, session: &mut Session) -> Result<()> {
        if let Err(e) = self.commit_class(session, CommitOrder::Pre).await {
            self.release_after_failure(session).await;
            return Err(e);
        }

        let normal = if session.transaction_mode == TransactionMode::Twopc {
            self.commit_2pc(session).await
        } else {
            self.commit_normal(session).await
        };
        if let Err(e) = normal {
            self.release_after_failure(session).await;
            return Err(e);
        }

        if let Err(e) = self.commit_class(session, CommitOrder::Post).await {
            session.record_warning(0, format!("post-operation transaction had an error: {}", e));
            if session.in_reserved_conn {
                self.release_after_failure(session).await;
            }
        }
        Ok(())
    }

    /// Commit every record of one class concurrently
    async fn commit_class(&self, session: &mut Session, order: CommitOrder) -> Result<()> {
        let (slots, records) = collect_slots(session, &[order]);
        let service = self.service.clone();
        let results = fanout::run(records, move |r| commit_shard(service.clone(), r)).await;
        apply_results(session, slots, results)
    }

    /// Commit the `normal` class without two-phase commit
    pub(crate) async fn commit_normal(&self, session: &mut Session) -> Result<()> {
        let count = session.shard_sessions.len();
        if count > 1
            && session.transaction_mode == TransactionMode::Single
            && count <= self.config.max_atomic_commit_shards
        {
            self.commit_concurrent(session).await
        } else {
            self.commit_sequential(session).await
        }
    }

    /// Commit shard by shard, stopping at the first failure
    async fn commit_sequential(&self, session: &mut Session) -> Result<()> {
        let mut committed: Vec<String> = Vec::new();
        for index in 0..session.shard_sessions.len() {
            let record = session.shard_sessions[index].clone();
            let had_transaction = record.transaction_id != 0;
            match commit_shard(self.service.clone(), record).await {
                Ok(updated) => {
                    if had_transaction {
                        committed.push(updated.target.shard.clone());
                    }
                    session.shard_sessions[index] = updated;
                }
                Err(e) => {
                    if !committed.is_empty() {
                        self.record_non_atomic(session, &committed);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Commit every `normal` record at once; committed shards stay committed
    async fn commit_concurrent(&self, session: &mut Session) -> Result<()> {
        let (slots, records) = collect_slots(session, &[CommitOrder::Normal]);
        let service = self.service.clone();
        let results = fanout::run(records.clone(), move |r| {
            commit_shard(service.clone(), r)
        })
        .await;

        let committed: Vec<String> = records
            .iter()
            .zip(&results)
            .filter(|(record, result)| record.transaction_id != 0 && result.is_ok())
            .map(|(record, _)| record.target.shard.clone())
            .collect();

        let outcome = apply_results(session, slots, results);
        if outcome.is_err() && !committed.is_empty() {
            self.record_non_atomic(session, &committed);
        }
        outcome
    }

    fn record_non_atomic(&self, session: &mut Session, committed: &[String]) {
        session.record_warning(ER_NON_ATOMIC_COMMIT, non_atomic_warning(committed));
        self.metrics.record_non_atomic_commit();
    }

    async fn release_after_failure(&self, session: &mut Session) {
        if let Err(e) = self.release(session).await {
            tracing::warn!("Release failed after commit failure: {}", e);
        }
    }

    /// Roll back every open transaction of `orders` in one fan-out
    pub(crate) async fn rollback_classes(
        &self,
        session: &mut Session,
        orders: &[CommitOrder],
    ) -> Result<()> {
        let (slots, records) = collect_slots(session, orders);
        let service = self.service.clone();
        let results = fanout::run(records, move |r| rollback_shard(service.clone(), r)).await;
        apply_results(session, slots, results)
    }

    /// Roll back the session's transaction on every shard
    ///
    /// On failure every handle of the session is released and a warning is
    /// recorded; the error is still returned.
    pub async fn rollback(&self, session: &mut Session) -> Result<()> {
        if !session.in_transaction {
            return Ok(());
        }

        let result = self.rollback_classes(session, &CommitOrder::ALL).await;
        if let Err(e) = &result {
            session.record_warning(
                0,
                format!(
                    "rollback encountered an error and connection to all shard for this session is released: {}",
                    e
                ),
            );
            if let Err(release_err) = self.release(session).await {
                tracing::warn!("Release failed after rollback failure: {}", release_err);
            }
        }

        session.reset_tx();
        result
    }

    /// Release every handle the session holds, keeping reserved-connection mode
    pub async fn release(&self, session: &mut Session) -> Result<()> {
        if !session.in_transaction && !session.in_reserved_conn {
            return Ok(());
        }
        let result = self.release_records(session).await;
        session.reset();
        result
    }

    /// Release every handle the session holds and leave reserved-connection mode
    pub async fn release_all(&self, session: &mut Session) -> Result<()> {
        if !session.in_transaction && !session.in_reserved_conn {
            return Ok(());
        }
        let result = self.release_records(session).await;
        session.reset_all();
        result
    }

    async fn release_records(&self, session: &Session) -> Result<()> {
        let records: Vec<ShardSession> = session
            .all_records()
            .filter(|r| r.holds_handles())
            .cloned()
            .collect();
        let service = self.service.clone();
        let results =
            fanout::run_records(&records, move |r| release_shard(service.clone(), r)).await;
        fanout::into_result(results).map(|_| ())
    }
}
