//! Distributed transaction identifier
//!
//! A dtid names the metadata manager that owns the durable record of a
//! distributed transaction: `{keyspace}:{shard}:{local-transaction-id}`.

use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reasons a dtid string is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DtidError {
    #[error("invalid parts in dtid: {0}")]
    InvalidParts(String),

    #[error("invalid transaction id in dtid: {0}")]
    InvalidTransactionId(String),
}

/// Parsed distributed transaction identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dtid {
    keyspace: String,
    shard: String,
    transaction_id: u64,
}

impl Dtid {
    /// Build the dtid for a transaction whose metadata manager is `mm`
    pub fn new(mm: &Target, transaction_id: u64) -> Self {
        Self {
            keyspace: mm.keyspace.clone(),
            shard: mm.shard.clone(),
            transaction_id,
        }
    }

    /// Parse from string representation
    ///
    /// Exactly three colon-separated parts are required and the last one must
    /// be a numeric transaction id.
    pub fn parse(s: &str) -> Result<Self, DtidError> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(DtidError::InvalidParts(s.to_string()));
        }

        let transaction_id = parts[2]
            .parse::<u64>()
            .map_err(|_| DtidError::InvalidTransactionId(s.to_string()))?;

        Ok(Self {
            keyspace: parts[0].to_string(),
            shard: parts[1].to_string(),
            transaction_id,
        })
    }

    /// Target of the metadata manager shard
    pub fn mm_target(&self) -> Target {
        Target::primary(self.keyspace.clone(), self.shard.clone())
    }

    /// Local transaction id of the metadata manager's branch
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }
}

impl fmt::Display for Dtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.keyspace, self.shard, self.transaction_id)
    }
}
