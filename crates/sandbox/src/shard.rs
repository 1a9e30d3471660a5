//! A single in-memory shard primary
//!
//! Holds just enough transactional state to make protocol mistakes visible:
//! open transactions, reserved connections, prepared branches and the 2PC
//! metadata table a metadata manager would persist.

use crate::call_log::Verb;
use parking_lot::Mutex;
use shardgate_common::{
    ErrorCode, RpcError, RpcResult, TabletAlias, Target, TransactionMetadata, TransactionState,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How an injected failure is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injected {
    /// Fail without touching state
    Before(ErrorCode),
    /// Apply the call, then report failure anyway
    After(ErrorCode),
}

#[derive(Default)]
struct ShardState {
    /// Open transaction id -> reserved id it runs on
    open: HashMap<u64, u64>,
    reserved: HashSet<u64>,
    /// dtid -> local transaction id of the prepared branch
    prepared: HashMap<String, u64>,
    metadata: BTreeMap<String, TransactionMetadata>,
    /// Replaces the metadata table in `UnresolvedTransactions` replies
    unresolved_override: Option<Vec<TransactionMetadata>>,
}

/// In-memory primary for one keyspace/shard
pub struct SandboxShard {
    target: Target,
    alias: Mutex<TabletAlias>,
    counters: [AtomicU64; Verb::COUNT],
    next_id: AtomicU64,
    state: Mutex<ShardState>,
    failures: Mutex<HashMap<Verb, VecDeque<Injected>>>,
    delay: Mutex<Option<Duration>>,
}

fn injected_error(code: ErrorCode) -> RpcError {
    RpcError::new(code, format!("{} error", code))
}

impl SandboxShard {
    pub(crate) fn new(target: Target, alias: TabletAlias) -> Self {
        Self {
            target,
            alias: Mutex::new(alias),
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            next_id: AtomicU64::new(1),
            state: Mutex::new(ShardState::default()),
            failures: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn alias(&self) -> TabletAlias {
        self.alias.lock().clone()
    }

    /// Simulate a reparent: subsequent handles are issued by a new instance
    pub fn set_alias(&self, alias: TabletAlias) {
        *self.alias.lock() = alias;
    }

    /// Number of times `verb` reached this shard
    pub fn count(&self, verb: Verb) -> u64 {
        self.counters[verb.index()].load(Ordering::Relaxed)
    }

    /// Fail the next `times` calls of `verb` with `code`, leaving state untouched
    pub fn fail_next(&self, verb: Verb, code: ErrorCode, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(verb).or_default();
        queue.extend(std::iter::repeat_n(Injected::Before(code), times));
    }

    /// Apply the next call of `verb`, then report `code` to the caller
    ///
    /// Models an ambiguous outcome such as a timeout after the write landed.
    pub fn fail_next_after_apply(&self, verb: Verb, code: ErrorCode) {
        self.failures
            .lock()
            .entry(verb)
            .or_default()
            .push_back(Injected::After(code));
    }

    /// Delay every call by `delay` before it completes
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Serve a fixed list from `UnresolvedTransactions` instead of the metadata table
    pub fn set_unresolved_transactions(&self, records: Vec<TransactionMetadata>) {
        self.state.lock().unresolved_override = Some(records);
    }

    /// Open a reserved connection outside any transaction
    pub fn reserve(&self) -> u64 {
        let id = self.allocate_id();
        self.state.lock().reserved.insert(id);
        id
    }

    /// Ids of transactions still open on this shard
    pub fn open_transactions(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.state.lock().open.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn reserved_connections(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.state.lock().reserved.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn prepared_dtids(&self) -> Vec<String> {
        let mut dtids: Vec<String> = self.state.lock().prepared.keys().cloned().collect();
        dtids.sort();
        dtids
    }

    /// Persisted 2PC metadata for `dtid`, if this shard is its manager
    pub fn metadata(&self, dtid: &str) -> Option<TransactionMetadata> {
        self.state.lock().metadata.get(dtid).cloned()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record_call(&self, verb: Verb) {
        self.counters[verb.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delay(&self) -> Option<Duration> {
        *self.delay.lock()
    }

    /// Run `apply` subject to any failure queued for `verb`
    pub(crate) fn serve<T>(
        &self,
        verb: Verb,
        apply: impl FnOnce(&Self) -> RpcResult<T>,
    ) -> RpcResult<T> {
        let injected = self
            .failures
            .lock()
            .get_mut(&verb)
            .and_then(|queue| queue.pop_front());

        match injected {
            Some(Injected::Before(code)) => {
                tracing::debug!("{}: injected {} failure for {}", self.target, code, verb);
                Err(injected_error(code))
            }
            Some(Injected::After(code)) => {
                apply(self)?;
                tracing::debug!(
                    "{}: injected {} failure after applying {}",
                    self.target,
                    code,
                    verb
                );
                Err(injected_error(code))
            }
            None => apply(self),
        }
    }

    fn not_found(transaction_id: u64) -> RpcError {
        RpcError::new(
            ErrorCode::NotFound,
            format!("transaction {}: not found", transaction_id),
        )
    }

    /// Close a transaction and hand back the reserved id to keep using
    fn finish(&self, transaction_id: u64) -> RpcResult<u64> {
        let reserved_id = self
            .state
            .lock()
            .open
            .remove(&transaction_id)
            .ok_or_else(|| Self::not_found(transaction_id))?;

        if reserved_id == 0 {
            return Ok(0);
        }

        // The connection survives the transaction under a fresh id
        let renewed = self.allocate_id();
        let mut state = self.state.lock();
        state.reserved.remove(&reserved_id);
        state.reserved.insert(renewed);
        Ok(renewed)
    }

    pub(crate) fn begin(&self, reserved_id: u64) -> RpcResult<(u64, u64)> {
        if reserved_id != 0 && !self.state.lock().reserved.contains(&reserved_id) {
            return Err(RpcError::new(
                ErrorCode::FailedPrecondition,
                format!("reserved connection {}: not found", reserved_id),
            ));
        }
        let transaction_id = self.allocate_id();
        self.state.lock().open.insert(transaction_id, reserved_id);
        Ok((transaction_id, reserved_id))
    }

    pub(crate) fn commit(&self, transaction_id: u64) -> RpcResult<u64> {
        self.finish(transaction_id)
    }

    pub(crate) fn rollback(&self, transaction_id: u64) -> RpcResult<u64> {
        self.finish(transaction_id)
    }

    pub(crate) fn prepare(&self, transaction_id: u64, dtid: &str) -> RpcResult<()> {
        let mut state = self.state.lock();
        state
            .open
            .remove(&transaction_id)
            .ok_or_else(|| Self::not_found(transaction_id))?;
        state.prepared.insert(dtid.to_string(), transaction_id);
        Ok(())
    }

    pub(crate) fn commit_prepared(&self, dtid: &str) -> RpcResult<()> {
        self.state.lock().prepared.remove(dtid);
        Ok(())
    }

    pub(crate) fn rollback_prepared(&self, dtid: &str, original_id: u64) -> RpcResult<()> {
        let mut state = self.state.lock();
        state.prepared.remove(dtid);
        if original_id != 0 {
            state.open.remove(&original_id);
        }
        Ok(())
    }

    pub(crate) fn create_transaction(&self, dtid: &str, participants: &[Target]) -> RpcResult<()> {
        let mut state = self.state.lock();
        if state.metadata.contains_key(dtid) {
            return Err(RpcError::new(
                ErrorCode::AlreadyExists,
                format!("dtid {}: already exists", dtid),
            ));
        }
        state.metadata.insert(
            dtid.to_string(),
            TransactionMetadata {
                dtid: dtid.to_string(),
                state: TransactionState::Prepare,
                participants: participants.to_vec(),
                time_created: 0,
            },
        );
        Ok(())
    }

    pub(crate) fn start_commit(&self, transaction_id: u64, dtid: &str) -> RpcResult<()> {
        let mut state = self.state.lock();
        if !state.metadata.contains_key(dtid) {
            return Err(RpcError::new(
                ErrorCode::NotFound,
                format!("dtid {}: not found", dtid),
            ));
        }
        state
            .open
            .remove(&transaction_id)
            .ok_or_else(|| Self::not_found(transaction_id))?;
        if let Some(metadata) = state.metadata.get_mut(dtid) {
            metadata.state = TransactionState::Commit;
        }
        Ok(())
    }

    pub(crate) fn set_rollback(&self, dtid: &str, transaction_id: u64) -> RpcResult<()> {
        let mut state = self.state.lock();
        state.open.remove(&transaction_id);
        if let Some(metadata) = state.metadata.get_mut(dtid) {
            metadata.state = TransactionState::Rollback;
        }
        Ok(())
    }

    pub(crate) fn conclude_transaction(&self, dtid: &str) -> RpcResult<()> {
        self.state.lock().metadata.remove(dtid);
        Ok(())
    }

    pub(crate) fn unresolved_transactions(&self) -> RpcResult<Vec<TransactionMetadata>> {
        let state = self.state.lock();
        Ok(match &state.unresolved_override {
            Some(records) => records.clone(),
            None => state.metadata.values().cloned().collect(),
        })
    }

    pub(crate) fn release(&self, transaction_id: u64, reserved_id: u64) -> RpcResult<()> {
        let mut state = self.state.lock();
        if transaction_id != 0 {
            state.open.remove(&transaction_id);
        }
        if reserved_id != 0 {
            state.reserved.remove(&reserved_id);
        }
        Ok(())
    }
}
