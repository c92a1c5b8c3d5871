//! Typed request and response payloads, one pair per operation.

use std::collections::BTreeMap;

use classad_lite::Value;
use serde::{Deserialize, Serialize};

use crate::job::{ClusterId, ItemData, JobDescription, JobId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    /// `None` selects the pool's default queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocateResponse {
    pub name: String,
    pub address: String,
}

/// Payload of `begin_transaction` responses and of `commit` / `abort` requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRef {
    pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub transaction_id: String,
    pub description: JobDescription,
    pub count: usize,
    #[serde(default)]
    pub item_data: ItemData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub cluster_id: ClusterId,
    pub num_procs: usize,
}

/// Header of a framed spool request; the archive follows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolRequest {
    pub job_id: JobId,
    pub content_length: u64,
    pub content_sha256: String,
    pub manifest_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolResponse {
    pub job_id: JobId,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub constraint: String,
    /// Empty means every attribute
    #[serde(default)]
    pub projection: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub records: Vec<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRequest {
    pub constraint: String,
    pub attribute: String,
    /// `UNDEFINED` (JSON null) deletes the attribute
    pub value: Value,
    /// Extra guard evaluated per record; records failing it are matched but not edited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_if: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub matched: u64,
    pub edited: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Hold,
    Release,
    Remove,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Hold => "hold",
            JobAction::Release => "release",
            JobAction::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActRequest {
    pub constraint: String,
    pub action: JobAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActResponse {
    pub affected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub identity: String,
    #[serde(default)]
    pub authorizations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequestResponse {
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTokenRequest {
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTokenResponse {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_request_undefined_is_null() {
        let req = EditRequest {
            constraint: "ClusterId == 1".to_string(),
            attribute: "RetrievalClaim".to_string(),
            value: Value::Undefined,
            only_if: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json["value"].is_null());
        assert!(json.get("only_if").is_none());

        let back: EditRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.value, Value::Undefined);
    }

    #[test]
    fn test_job_id_wire_form() {
        let req = RetrieveRequest {
            job_id: JobId::new(ClusterId(12), 3),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"job_id": {"cluster": 12, "proc": 3}})
        );
    }

    #[test]
    fn test_action_names() {
        assert_eq!(serde_json::to_value(JobAction::Remove).unwrap(), "remove");
        assert_eq!(JobAction::Hold.as_str(), "hold");
    }
}
