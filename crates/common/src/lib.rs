//! Common types for shardgate
//!
//! This crate defines:
//! - Shard addressing (targets, tablet aliases)
//! - The backend error vocabulary (error codes, RPC errors)
//! - Distributed transaction identifiers and 2PC metadata
//! - The backend verb set consumed by the coordinator

mod dtid;
mod metadata;
mod query_service;
mod rpc;
mod target;

pub use dtid::{Dtid, DtidError};
pub use metadata::{TransactionMetadata, TransactionState};
pub use query_service::{BeginReply, QueryService};
pub use rpc::{ErrorCode, RpcError, RpcResult};
pub use target::{TabletAlias, TabletType, Target};
