//! Error types for the coordinator

use shardgate_common::{DtidError, ErrorCode, RpcError, TabletAlias, Target, TransactionState};
use thiserror::Error;

/// Coordinator error types
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// A single backend call failed
    #[error("target: {target}: {source}")]
    Shard {
        target: Target,
        #[source]
        source: RpcError,
    },

    /// One or more fan-out operations failed, in input order
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<CoordinatorError>),

    #[error(transparent)]
    MalformedDtid(#[from] DtidError),

    #[error("invalid state: {0}")]
    InvalidTransactionState(TransactionState),

    #[error("failed to resolve {failed} out of {total} transactions")]
    Unresolved { failed: usize, total: usize },

    #[error("tablet alias mismatch on {target}: handles belong to {expected}, got {actual}")]
    TabletAliasMismatch {
        target: Target,
        expected: TabletAlias,
        actual: TabletAlias,
    },

    #[error("no transaction is open on this session")]
    NotInTransaction,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_messages(errors: &[CoordinatorError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl CoordinatorError {
    /// Wrap a backend failure with the target it came from
    pub fn shard(target: &Target, source: RpcError) -> Self {
        Self::Shard {
            target: target.clone(),
            source,
        }
    }

    /// Collapse fan-out failures; a single failure is returned unwrapped
    pub fn aggregate(mut errors: Vec<CoordinatorError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Machine-readable code; aggregates report their first failure
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Shard { source, .. } => source.code,
            Self::Aggregate(errors) => errors
                .first()
                .map(CoordinatorError::code)
                .unwrap_or(ErrorCode::Unknown),
            Self::MalformedDtid(_) | Self::Config(_) | Self::SerializationError(_) => {
                ErrorCode::InvalidArgument
            }
            Self::InvalidTransactionState(_) | Self::Unresolved { .. } | Self::Internal(_) => {
                ErrorCode::Internal
            }
            Self::TabletAliasMismatch { .. } | Self::NotInTransaction => {
                ErrorCode::FailedPrecondition
            }
            Self::Io(_) => ErrorCode::Unknown,
        }
    }

    /// Every shard failure carried by this error as `(target, code)` pairs
    pub fn shard_errors(&self) -> Vec<(&Target, ErrorCode)> {
        match self {
            Self::Shard { target, source } => vec![(target, source.code)],
            Self::Aggregate(errors) => errors.iter().flat_map(|e| e.shard_errors()).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the outcome of the failed call is unknown under `uncertain_codes`
    pub fn is_uncertain(&self, uncertain_codes: &[ErrorCode]) -> bool {
        uncertain_codes.contains(&self.code())
    }
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_err(shard: &str, code: ErrorCode) -> CoordinatorError {
        CoordinatorError::shard(
            &Target::primary("ks", shard),
            RpcError::new(code, format!("{} error", code)),
        )
    }

    #[test]
    fn test_shard_error_names_target() {
        let err = shard_err("0", ErrorCode::InvalidArgument);
        assert_eq!(err.to_string(), "target: ks.0.primary: INVALID_ARGUMENT error");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_aggregate_keeps_order_and_first_code() {
        let err = CoordinatorError::aggregate(vec![
            shard_err("0", ErrorCode::Aborted),
            shard_err("1", ErrorCode::Unavailable),
        ])
        .unwrap();

        assert_eq!(
            err.to_string(),
            "target: ks.0.primary: ABORTED error\ntarget: ks.1.primary: UNAVAILABLE error"
        );
        assert_eq!(err.code(), ErrorCode::Aborted);

        let shards: Vec<_> = err
            .shard_errors()
            .into_iter()
            .map(|(t, c)| (t.shard.clone(), c))
            .collect();
        assert_eq!(
            shards,
            vec![
                ("0".to_string(), ErrorCode::Aborted),
                ("1".to_string(), ErrorCode::Unavailable)
            ]
        );
    }

    #[test]
    fn test_single_failure_not_wrapped() {
        let err = CoordinatorError::aggregate(vec![shard_err("0", ErrorCode::Internal)]).unwrap();
        assert!(matches!(err, CoordinatorError::Shard { .. }));
        assert!(CoordinatorError::aggregate(Vec::new()).is_none());
    }

    #[test]
    fn test_uncertain_classification() {
        let codes = [ErrorCode::DeadlineExceeded];
        assert!(shard_err("0", ErrorCode::DeadlineExceeded).is_uncertain(&codes));
        assert!(!shard_err("0", ErrorCode::InvalidArgument).is_uncertain(&codes));
    }

    #[test]
    fn test_resolver_messages() {
        let err = CoordinatorError::Unresolved {
            failed: 1,
            total: 3,
        };
        assert_eq!(err.to_string(), "failed to resolve 1 out of 3 transactions");
        assert_eq!(
            CoordinatorError::InvalidTransactionState(TransactionState::Unknown).to_string(),
            "invalid state: UNKNOWN"
        );
    }
}
