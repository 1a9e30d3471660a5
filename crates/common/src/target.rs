//! Shard addressing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a backend instance plays for its shard
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TabletType {
    /// Writable replica; the only role transactional work may target
    #[default]
    Primary,
    /// Read-only replica
    Replica,
    /// Read-only replica reserved for batch workloads
    Rdonly,
}

impl fmt::Display for TabletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
            Self::Rdonly => "rdonly",
        };
        f.write_str(name)
    }
}

/// Keyspace + shard + required backend role
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub keyspace: String,
    pub shard: String,
    pub tablet_type: TabletType,
}

impl Target {
    /// Target the primary of `keyspace/shard`
    pub fn primary(keyspace: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            tablet_type: TabletType::Primary,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.keyspace, self.shard, self.tablet_type)
    }
}

/// Identity of the backend instance a handle was issued against
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabletAlias {
    pub cell: String,
    pub uid: u32,
}

impl TabletAlias {
    pub fn new(cell: impl Into<String>, uid: u32) -> Self {
        Self {
            cell: cell.into(),
            uid,
        }
    }
}

impl fmt::Display for TabletAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:010}", self.cell, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        let target = Target::primary("commerce", "-80");
        assert_eq!(target.to_string(), "commerce.-80.primary");
    }

    #[test]
    fn test_alias_display() {
        assert_eq!(TabletAlias::new("zone1", 101).to_string(), "zone1-0000000101");
    }

    #[test]
    fn test_targets_order_by_keyspace_shard_then_type() {
        let replica = Target {
            tablet_type: TabletType::Replica,
            ..Target::primary("ks", "0")
        };
        let mut targets = vec![
            Target::primary("ks", "1"),
            replica.clone(),
            Target::primary("ks", "0"),
            Target::primary("alpha", "9"),
        ];
        targets.sort();

        assert_eq!(
            targets,
            vec![
                Target::primary("alpha", "9"),
                Target::primary("ks", "0"),
                replica,
                Target::primary("ks", "1"),
            ]
        );
        assert!(TabletType::Primary < TabletType::Replica);
    }
}
