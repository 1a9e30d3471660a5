//! Logical session state
//!
//! A [`Session`] belongs to exactly one client session. It accumulates one
//! [`ShardSession`] per shard touched, split into the three commit-order
//! classes, and is only ever mutated by one coordinator call at a time.

use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use shardgate_common::{TabletAlias, Target};
use std::fmt;

/// MySQL warning code for a deliberately non-atomic commit
pub const ER_NON_ATOMIC_COMMIT: u32 = 301;

/// What Commit may do when more than one shard is involved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionMode {
    Single,
    #[default]
    Multi,
    Twopc,
}

/// Ordering class a shard session commits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitOrder {
    Pre,
    #[default]
    Normal,
    Post,
}

impl CommitOrder {
    pub const ALL: [CommitOrder; 3] = [CommitOrder::Pre, CommitOrder::Normal, CommitOrder::Post];
}

/// Transaction characteristics requested at Begin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    ConsistentSnapshot,
    ReadWrite,
    ReadOnly,
}

/// Handles held on one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSession {
    pub target: Target,
    /// Zero when no transaction is open on this shard
    pub transaction_id: u64,
    /// Zero when no reserved connection is held
    pub reserved_id: u64,
    /// Instance that issued the handles
    pub tablet_alias: Option<TabletAlias>,
}

impl ShardSession {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            transaction_id: 0,
            reserved_id: 0,
            tablet_alias: None,
        }
    }

    pub fn with_transaction(mut self, transaction_id: u64) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    pub fn with_reserved(mut self, reserved_id: u64) -> Self {
        self.reserved_id = reserved_id;
        self
    }

    pub fn with_alias(mut self, alias: TabletAlias) -> Self {
        self.tablet_alias = Some(alias);
        self
    }

    /// Whether the record still refers to anything on the backend
    pub fn holds_handles(&self) -> bool {
        self.transaction_id != 0 || self.reserved_id != 0
    }
}

/// Advisory message surfaced to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: u32,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// State of one logical client session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub in_transaction: bool,
    pub in_reserved_conn: bool,
    /// Committed strictly before `shard_sessions`
    pub pre_sessions: Vec<ShardSession>,
    /// The main body of the transaction
    pub shard_sessions: Vec<ShardSession>,
    /// Committed strictly after `shard_sessions`, best effort
    pub post_sessions: Vec<ShardSession>,
    pub transaction_mode: TransactionMode,
    /// Class new shard sessions are appended to
    pub commit_order: CommitOrder,
    pub warnings: Vec<Warning>,
    /// Access mode of the current transaction only
    pub access_mode: Vec<AccessMode>,
    /// Set once any statement in the current transaction wrote
    pub read_write: bool,
}

impl Session {
    pub fn new(transaction_mode: TransactionMode) -> Self {
        Self {
            transaction_mode,
            ..Default::default()
        }
    }

    pub fn set_commit_order(&mut self, order: CommitOrder) {
        self.commit_order = order;
    }

    pub fn records(&self, order: CommitOrder) -> &[ShardSession] {
        match order {
            CommitOrder::Pre => &self.pre_sessions,
            CommitOrder::Normal => &self.shard_sessions,
            CommitOrder::Post => &self.post_sessions,
        }
    }

    pub(crate) fn records_mut(&mut self, order: CommitOrder) -> &mut Vec<ShardSession> {
        match order {
            CommitOrder::Pre => &mut self.pre_sessions,
            CommitOrder::Normal => &mut self.shard_sessions,
            CommitOrder::Post => &mut self.post_sessions,
        }
    }

    /// All records, pre then normal then post
    pub fn all_records(&self) -> impl Iterator<Item = &ShardSession> {
        self.pre_sessions
            .iter()
            .chain(self.shard_sessions.iter())
            .chain(self.post_sessions.iter())
    }

    pub fn record_count(&self) -> usize {
        self.pre_sessions.len() + self.shard_sessions.len() + self.post_sessions.len()
    }

    /// Record for `target` in class `order`
    pub fn find(&self, target: &Target, order: CommitOrder) -> Option<&ShardSession> {
        self.records(order).iter().find(|s| &s.target == target)
    }

    /// Insert or refresh the record for `record.target` in class `order`
    ///
    /// New targets are appended so insertion order is commit order. A record
    /// without handles removes any existing entry for its target. Handles
    /// issued by a different instance than the one already recorded are
    /// rejected.
    pub fn append_or_update(&mut self, record: ShardSession, order: CommitOrder) -> Result<()> {
        let records = self.records_mut(order);
        let position = records.iter().position(|s| s.target == record.target);

        let Some(index) = position else {
            if record.holds_handles() {
                records.push(record);
            }
            return Ok(());
        };

        if !record.holds_handles() {
            records.remove(index);
            return Ok(());
        }

        let existing = &mut records[index];
        if existing.holds_handles()
            && let (Some(expected), Some(actual)) = (&existing.tablet_alias, &record.tablet_alias)
            && expected != actual
        {
            return Err(CoordinatorError::TabletAliasMismatch {
                target: record.target,
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }

        existing.transaction_id = record.transaction_id;
        existing.reserved_id = record.reserved_id;
        if record.tablet_alias.is_some() {
            existing.tablet_alias = record.tablet_alias;
        }
        Ok(())
    }

    /// Add a client-visible warning
    pub fn record_warning(&mut self, code: u32, message: impl Into<String>) {
        let warning = Warning {
            code,
            message: message.into(),
        };
        tracing::warn!("Session warning: {}", warning);
        self.warnings.push(warning);
    }

    /// End the current transaction's bookkeeping
    ///
    /// Reserved sessions keep every record that still holds a handle.
    pub fn reset_tx(&mut self) {
        self.in_transaction = false;
        self.commit_order = CommitOrder::Normal;
        self.read_write = false;
        self.access_mode.clear();

        if self.in_reserved_conn {
            for order in CommitOrder::ALL {
                self.records_mut(order).retain(ShardSession::holds_handles);
            }
        } else {
            self.clear_records();
        }
    }

    /// Forget every shard handle, keeping the reserved-connection flag
    pub fn reset(&mut self) {
        self.in_transaction = false;
        self.commit_order = CommitOrder::Normal;
        self.read_write = false;
        self.access_mode.clear();
        self.clear_records();
    }

    /// Forget every shard handle and leave reserved-connection mode
    pub fn reset_all(&mut self) {
        self.reset();
        self.in_reserved_conn = false;
    }

    fn clear_records(&mut self) {
        self.pre_sessions.clear();
        self.shard_sessions.clear();
        self.post_sessions.clear();
    }
}
