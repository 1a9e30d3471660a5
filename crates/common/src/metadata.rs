//! Durable 2PC metadata as reported by a metadata manager

use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recorded decision of a distributed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    /// Never a valid recorded state; seeing it means a bug or corruption
    Unknown,
    /// Metadata created, commit decision not yet taken
    Prepare,
    /// Commit decision durably recorded
    Commit,
    /// Rollback decision durably recorded
    Rollback,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Prepare => "PREPARE",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
        };
        f.write_str(name)
    }
}

/// One pending distributed transaction
///
/// The dtid stays a raw string here: records come straight off the metadata
/// manager and may be malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub dtid: String,
    pub state: TransactionState,
    /// Shards holding a prepared branch, in commit order
    pub participants: Vec<Target>,
    /// Creation time in nanoseconds since the Unix epoch
    #[serde(default)]
    pub time_created: i64,
}
