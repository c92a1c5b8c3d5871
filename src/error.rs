//! Top-level error type for protocol operations

use crate::config::ConfigError;
use crate::job::JobError;
use crate::remap::RemapError;
use crate::schedd::RpcError;
use crate::spool::bundle::BundleError;
use crate::summary::FailureKind;

#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    #[error("queue {name:?} not found in pool: {message}")]
    EndpointNotFound { name: String, message: String },

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("timed out after {waited_seconds}s")]
    TimedOut { waited_seconds: u64 },

    #[error("queue query failed: {0}")]
    RemoteQuery(String),

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Protocol step a remote failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transaction,
    Transfer,
    Query,
}

impl SpoolError {
    /// Classify a remote failure by the step that produced it
    pub fn remote(stage: Stage, err: RpcError) -> Self {
        if matches!(err, RpcError::Cancelled) {
            return SpoolError::Cancelled;
        }
        let message = err.to_string();
        match stage {
            Stage::Transaction => SpoolError::Submission(message),
            Stage::Transfer => SpoolError::Transfer(message),
            Stage::Query => SpoolError::RemoteQuery(message),
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SpoolError::EndpointNotFound { .. } => FailureKind::EndpointNotFound,
            SpoolError::Submission(_) => FailureKind::Submission,
            SpoolError::Transfer(_) => FailureKind::Transfer,
            SpoolError::TimedOut { .. } => FailureKind::TimedOut,
            SpoolError::RemoteQuery(_) => FailureKind::RemoteQuery,
            SpoolError::Cancelled => FailureKind::Cancelled,
            SpoolError::Config(_) => FailureKind::Config,
        }
    }
}

impl From<JobError> for SpoolError {
    fn from(err: JobError) -> Self {
        SpoolError::Submission(err.to_string())
    }
}

impl From<RemapError> for SpoolError {
    fn from(err: RemapError) -> Self {
        SpoolError::Submission(err.to_string())
    }
}

impl From<ConfigError> for SpoolError {
    fn from(err: ConfigError) -> Self {
        SpoolError::Config(err.to_string())
    }
}

impl From<BundleError> for SpoolError {
    fn from(err: BundleError) -> Self {
        SpoolError::Transfer(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        let err = SpoolError::EndpointNotFound {
            name: "schedd@example".to_string(),
            message: "no such daemon".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::EndpointNotFound);
        assert_eq!(SpoolError::Cancelled.failure_kind().exit_code().as_i32(), 80);
        assert_eq!(
            SpoolError::TimedOut { waited_seconds: 3 }.failure_kind(),
            FailureKind::TimedOut
        );
    }

    #[test]
    fn test_remote_errors_follow_stage() {
        let busy = || RpcError::Busy { retry_after_seconds: 1 };
        assert!(matches!(SpoolError::remote(Stage::Transaction, busy()), SpoolError::Submission(_)));
        assert!(matches!(SpoolError::remote(Stage::Transfer, busy()), SpoolError::Transfer(_)));
        assert!(matches!(SpoolError::remote(Stage::Query, busy()), SpoolError::RemoteQuery(_)));
        assert!(matches!(
            SpoolError::remote(Stage::Query, RpcError::Cancelled),
            SpoolError::Cancelled
        ));
    }

    #[test]
    fn test_item_mismatch_is_submission_error() {
        let err: SpoolError = JobError::ItemCountMismatch { count: 3, items: 2 }.into();
        assert_eq!(err.failure_kind(), FailureKind::Submission);
        assert!(err.to_string().contains("count is 3"));
    }
}
