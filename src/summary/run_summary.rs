//! Run summary printed at the end of a CLI invocation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::failure::{ExitCode, FailureKind, OutcomeAggregator, RunOutcome};
use super::instance::InstanceOutcome;
use crate::error::SpoolError;
use crate::job::ClusterId;

pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

pub const RUN_SUMMARY_SCHEMA_ID: &str = "remote-spool/run_summary@1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub schema_id: String,

    /// Run identifier (ULID)
    pub run_id: String,

    pub created_at: DateTime<Utc>,

    /// Subcommand that produced this summary
    pub command: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,

    pub outcome: RunOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    pub exit_code: i32,

    pub instances_succeeded: usize,
    pub instances_failed: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceOutcome>,

    pub duration_ms: u64,

    pub human_summary: String,
}

impl RunSummary {
    fn base(command: &str, cluster_id: Option<ClusterId>, duration_ms: u64) -> Self {
        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id: ulid::Ulid::new().to_string().to_lowercase(),
            created_at: Utc::now(),
            command: command.to_string(),
            cluster_id,
            outcome: RunOutcome::Success,
            failure_kind: None,
            exit_code: ExitCode::Success.as_i32(),
            instances_succeeded: 0,
            instances_failed: 0,
            instances: Vec::new(),
            duration_ms,
            human_summary: String::new(),
        }
    }

    /// Aggregate per-instance outcomes
    pub fn from_instances(
        command: &str,
        cluster_id: Option<ClusterId>,
        instances: Vec<InstanceOutcome>,
        duration_ms: u64,
    ) -> Self {
        let mut aggregator = OutcomeAggregator::new();
        for instance in &instances {
            aggregator.add(instance.failure_kind);
        }

        let mut summary = Self::base(command, cluster_id, duration_ms);
        summary.outcome = aggregator.outcome();
        summary.failure_kind = aggregator.first_failure();
        summary.exit_code = aggregator.exit_code().as_i32();
        summary.instances_succeeded = aggregator.succeeded();
        summary.instances_failed = aggregator.failed();
        summary.instances = instances;
        summary.human_summary = summary.generate_human_summary();
        summary
    }

    /// Summary of a step that failed as a whole
    pub fn from_error(
        command: &str,
        cluster_id: Option<ClusterId>,
        error: &SpoolError,
        duration_ms: u64,
    ) -> Self {
        let kind = error.failure_kind();
        let mut summary = Self::base(command, cluster_id, duration_ms);
        summary.outcome = RunOutcome::Failed;
        summary.failure_kind = Some(kind);
        summary.exit_code = kind.exit_code().as_i32();
        summary.human_summary = format!("{} {}: {}", command, kind.description(), error);
        summary
    }

    /// Summary of a step with no per-instance results
    pub fn success(command: &str, cluster_id: Option<ClusterId>, message: &str, duration_ms: u64) -> Self {
        let mut summary = Self::base(command, cluster_id, duration_ms);
        summary.human_summary = message.to_string();
        summary
    }

    /// Override the outcome, e.g. when a later phase of a cycle was skipped
    pub fn with_outcome(mut self, outcome: RunOutcome, exit_code: ExitCode) -> Self {
        self.outcome = outcome;
        self.exit_code = exit_code.as_i32();
        self.human_summary = self.generate_human_summary();
        self
    }

    fn generate_human_summary(&self) -> String {
        let total = self.instances_succeeded + self.instances_failed;
        let cluster = self
            .cluster_id
            .map(|c| format!(" (cluster {})", c))
            .unwrap_or_default();
        match self.outcome {
            RunOutcome::Success => format!(
                "{} succeeded{}: {}/{} instances",
                self.command, cluster, self.instances_succeeded, total
            ),
            RunOutcome::Partial => format!(
                "{} partially succeeded{}: {} succeeded, {} failed",
                self.command, cluster, self.instances_succeeded, self.instances_failed
            ),
            RunOutcome::Failed => format!(
                "{} failed{}: {} of {} instances failed",
                self.command, cluster, self.instances_failed, total
            ),
        }
    }

    pub fn exit_code_enum(&self) -> Option<ExitCode> {
        ExitCode::from_i32(self.exit_code)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;

    fn ok(proc: i64) -> InstanceOutcome {
        InstanceOutcome::success(JobId::new(ClusterId(7), proc), Vec::new())
    }

    fn failed(proc: i64, kind: FailureKind) -> InstanceOutcome {
        InstanceOutcome::failure(JobId::new(ClusterId(7), proc), kind, "boom")
    }

    #[test]
    fn test_all_success() {
        let run = RunSummary::from_instances("run", Some(ClusterId(7)), vec![ok(0), ok(1)], 20);
        assert_eq!(run.outcome, RunOutcome::Success);
        assert_eq!(run.exit_code, 0);
        assert_eq!(run.instances_succeeded, 2);
        assert_eq!(run.human_summary, "run succeeded (cluster 7): 2/2 instances");
    }

    #[test]
    fn test_partial() {
        let run = RunSummary::from_instances(
            "submit",
            Some(ClusterId(7)),
            vec![ok(0), failed(1, FailureKind::Transfer)],
            20,
        );
        assert_eq!(run.outcome, RunOutcome::Partial);
        assert_eq!(run.exit_code_enum(), Some(ExitCode::Partial));
        assert_eq!(run.failure_kind, Some(FailureKind::Transfer));
    }

    #[test]
    fn test_from_error() {
        let err = SpoolError::EndpointNotFound {
            name: "q".to_string(),
            message: "unknown".to_string(),
        };
        let run = RunSummary::from_error("submit", None, &err, 5);
        assert_eq!(run.exit_code, 20);
        assert_eq!(run.outcome, RunOutcome::Failed);
        assert!(run.human_summary.contains("unknown"));
    }

    #[test]
    fn test_json_roundtrip_and_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let run = RunSummary::from_instances("retrieve", Some(ClusterId(7)), vec![ok(0)], 1);
        let json = run.to_json().unwrap();
        assert!(json.contains(r#""schema_id": "remote-spool/run_summary@1""#));
        assert_eq!(RunSummary::from_json(&json).unwrap().run_id, run.run_id);

        let path = dir.path().join("run_summary.json");
        run.write_to_file(&path).unwrap();
        assert!(path.exists());
    }
}
