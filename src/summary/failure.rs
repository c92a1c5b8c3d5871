//! Failure taxonomy and stable exit codes

use serde::{Deserialize, Serialize};

/// Terminal outcome of a submission, retrieval or full cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every instance succeeded
    Success,
    /// Some instances succeeded, some failed
    Partial,
    /// Nothing succeeded
    Failed,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

/// Failure kind - categorizes the cause of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Configuration could not be loaded or failed validation
    Config,
    /// The pool directory does not know the queue
    EndpointNotFound,
    /// Transaction, enqueue or commit failed
    Submission,
    /// Input spool or output retrieval failed
    Transfer,
    /// Query or edit against the queue failed
    RemoteQuery,
    /// Deadline exceeded while waiting
    TimedOut,
    /// Cancelled by the user
    Cancelled,
}

impl FailureKind {
    /// Get the stable exit code for this failure kind
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Config => ExitCode::Config,
            FailureKind::EndpointNotFound => ExitCode::EndpointNotFound,
            FailureKind::Submission => ExitCode::Submission,
            FailureKind::Transfer => ExitCode::Transfer,
            FailureKind::RemoteQuery => ExitCode::RemoteQuery,
            FailureKind::TimedOut => ExitCode::TimedOut,
            FailureKind::Cancelled => ExitCode::Cancelled,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Config => "Configuration error",
            FailureKind::EndpointNotFound => "Queue not found in pool",
            FailureKind::Submission => "Submission failed",
            FailureKind::Transfer => "File transfer failed",
            FailureKind::RemoteQuery => "Queue query failed",
            FailureKind::TimedOut => "Timed out waiting for jobs",
            FailureKind::Cancelled => "Cancelled",
        }
    }
}

/// Stable exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    #[default]
    Success = 0,
    Config = 10,
    EndpointNotFound = 20,
    Submission = 30,
    Transfer = 40,
    RemoteQuery = 50,
    TimedOut = 60,
    /// Some instances failed while others succeeded
    Partial = 70,
    Cancelled = 80,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            10 => Some(ExitCode::Config),
            20 => Some(ExitCode::EndpointNotFound),
            30 => Some(ExitCode::Submission),
            40 => Some(ExitCode::Transfer),
            50 => Some(ExitCode::RemoteQuery),
            60 => Some(ExitCode::TimedOut),
            70 => Some(ExitCode::Partial),
            80 => Some(ExitCode::Cancelled),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

/// Folds per-instance results into a run outcome and exit code
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    succeeded: usize,
    failed: usize,
    cancelled: bool,
    first_failure: Option<FailureKind>,
}

impl OutcomeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, failure: Option<FailureKind>) {
        match failure {
            None => self.succeeded += 1,
            Some(kind) => {
                self.failed += 1;
                if kind == FailureKind::Cancelled {
                    self.cancelled = true;
                }
                if self.first_failure.is_none() {
                    self.first_failure = Some(kind);
                }
            }
        }
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// No instances at all counts as a failure
    pub fn outcome(&self) -> RunOutcome {
        match (self.succeeded, self.failed) {
            (0, _) => RunOutcome::Failed,
            (_, 0) => RunOutcome::Success,
            _ => RunOutcome::Partial,
        }
    }

    pub fn first_failure(&self) -> Option<FailureKind> {
        self.first_failure
    }

    /// Cancellation wins, then a total failure's first cause, then partial
    pub fn exit_code(&self) -> ExitCode {
        if self.cancelled {
            return ExitCode::Cancelled;
        }
        match self.outcome() {
            RunOutcome::Success => ExitCode::Success,
            RunOutcome::Partial => ExitCode::Partial,
            RunOutcome::Failed => self
                .first_failure
                .map(|k| k.exit_code())
                .unwrap_or(ExitCode::Submission),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(serde_json::to_string(&RunOutcome::Success).unwrap(), r#""success""#);
        assert_eq!(serde_json::to_string(&RunOutcome::Partial).unwrap(), r#""partial""#);
        assert_eq!(
            serde_json::to_string(&FailureKind::EndpointNotFound).unwrap(),
            r#""ENDPOINT_NOT_FOUND""#
        );
    }

    #[test]
    fn test_exit_code_values() {
        assert_eq!(FailureKind::Config.exit_code().as_i32(), 10);
        assert_eq!(FailureKind::EndpointNotFound.exit_code().as_i32(), 20);
        assert_eq!(FailureKind::Submission.exit_code().as_i32(), 30);
        assert_eq!(FailureKind::Transfer.exit_code().as_i32(), 40);
        assert_eq!(FailureKind::RemoteQuery.exit_code().as_i32(), 50);
        assert_eq!(FailureKind::TimedOut.exit_code().as_i32(), 60);
        assert_eq!(FailureKind::Cancelled.exit_code().as_i32(), 80);
        assert_eq!(ExitCode::from_i32(70), Some(ExitCode::Partial));
        assert_eq!(ExitCode::from_i32(999), None);
    }

    #[test]
    fn test_aggregator_all_success() {
        let mut agg = OutcomeAggregator::new();
        agg.add(None);
        agg.add(None);
        assert_eq!(agg.outcome(), RunOutcome::Success);
        assert_eq!(agg.exit_code(), ExitCode::Success);
    }

    #[test]
    fn test_aggregator_partial() {
        let mut agg = OutcomeAggregator::new();
        agg.add(None);
        agg.add(Some(FailureKind::Transfer));
        assert_eq!(agg.outcome(), RunOutcome::Partial);
        assert_eq!(agg.exit_code(), ExitCode::Partial);
        assert_eq!(agg.first_failure(), Some(FailureKind::Transfer));
    }

    #[test]
    fn test_aggregator_all_failed_uses_first_cause() {
        let mut agg = OutcomeAggregator::new();
        agg.add(Some(FailureKind::Transfer));
        agg.add(Some(FailureKind::RemoteQuery));
        assert_eq!(agg.outcome(), RunOutcome::Failed);
        assert_eq!(agg.exit_code(), ExitCode::Transfer);
    }

    #[test]
    fn test_aggregator_cancelled_wins() {
        let mut agg = OutcomeAggregator::new();
        agg.add(None);
        agg.add(Some(FailureKind::Transfer));
        agg.add(Some(FailureKind::Cancelled));
        assert_eq!(agg.exit_code(), ExitCode::Cancelled);
    }

    #[test]
    fn test_aggregator_empty_is_failed() {
        assert_eq!(OutcomeAggregator::new().outcome(), RunOutcome::Failed);
    }
}
