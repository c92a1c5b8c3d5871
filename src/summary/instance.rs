//! Per-instance outcome recorded by spool and retrieve steps

use serde::{Deserialize, Serialize};

use super::failure::FailureKind;
use crate::job::JobId;

/// Result of one protocol step for one job instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOutcome {
    pub job_id: JobId,

    /// Set when the step failed for this instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Files spooled or written locally, relative to the step's directory
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl InstanceOutcome {
    pub fn success(job_id: JobId, files: Vec<String>) -> Self {
        Self {
            job_id,
            failure_kind: None,
            message: None,
            files,
        }
    }

    pub fn failure(job_id: JobId, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            job_id,
            failure_kind: Some(kind),
            message: Some(message.into()),
            files: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure_kind.is_none()
    }
}
