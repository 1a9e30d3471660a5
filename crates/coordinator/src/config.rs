//! Coordinator configuration

use crate::error::{CoordinatorError, Result};
use crate::session::TransactionMode;
use serde::{Deserialize, Serialize};
use shardgate_common::ErrorCode;
use std::path::Path;

/// Configuration for commit behavior
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Mode given to sessions created by the coordinator
    pub transaction_mode: TransactionMode,

    /// Largest `normal` class committed concurrently in SINGLE mode; larger
    /// sets commit shard by shard
    pub max_atomic_commit_shards: usize,

    /// StartCommit failure codes after which the commit decision may still
    /// have been recorded. Any other code is a definite failure.
    pub uncertain_start_commit_codes: Vec<ErrorCode>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            transaction_mode: TransactionMode::Multi,
            max_atomic_commit_shards: 16,
            uncertain_start_commit_codes: vec![
                ErrorCode::DeadlineExceeded,
                ErrorCode::Unavailable,
                ErrorCode::Unknown,
                ErrorCode::Canceled,
            ],
        }
    }
}

impl CoordinatorConfig {
    /// Parse and validate a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_atomic_commit_shards == 0 {
            return Err(CoordinatorError::Config(
                "max_atomic_commit_shards must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
