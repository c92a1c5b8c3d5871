//! Request/response envelope for the queue gateway.
//!
//! One JSON request goes in, one JSON response comes out. Spool requests are
//! followed by the raw archive bytes, and retrieve responses are followed by
//! the output archive bytes, with the JSON header on the first line.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Envelope version spoken by this client
pub const PROTOCOL_VERSION: i32 = 1;

/// Operations exposed by the pool directory and the job queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Resolve a queue name to an address through the pool's directory
    Locate,
    /// Open a queue transaction
    BeginTransaction,
    /// Enqueue a batch of instances inside an open transaction
    Enqueue,
    /// Commit an open transaction
    Commit,
    /// Discard an open transaction
    Abort,
    /// Upload one instance's input archive and release its hold
    Spool,
    /// Select records by constraint, projecting attributes
    Query,
    /// Download one instance's output archive
    Retrieve,
    /// Set an attribute on records matching a constraint
    Edit,
    /// Apply an action (hold, release, remove) to matching records
    Act,
    /// Ask the queue's registration service for a token
    RequestToken,
    /// Collect a token once its request has been approved
    FetchToken,
}

impl Operation {
    /// Whether repeating the operation after an ambiguous failure is harmless
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Operation::Locate
                | Operation::Spool
                | Operation::Query
                | Operation::Retrieve
                | Operation::Edit
                | Operation::Act
                | Operation::FetchToken
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Locate => "locate",
            Operation::BeginTransaction => "begin_transaction",
            Operation::Enqueue => "enqueue",
            Operation::Commit => "commit",
            Operation::Abort => "abort",
            Operation::Spool => "spool",
            Operation::Query => "query",
            Operation::Retrieve => "retrieve",
            Operation::Edit => "edit",
            Operation::Act => "act",
            Operation::RequestToken => "request_token",
            Operation::FetchToken => "fetch_token",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub protocol_version: i32,

    pub op: Operation,

    /// Caller-chosen ID, unique per request, echoed in the response
    pub request_id: String,

    /// Operation-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RpcRequest {
    pub fn new(op: Operation, request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            op,
            request_id: request_id.into(),
            payload,
        }
    }
}

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub protocol_version: i32,

    pub request_id: String,

    pub ok: bool,

    /// Present when ok=true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Present when ok=false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorPayload>,
}

impl RpcResponse {
    pub fn success(request_id: String, payload: serde_json::Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            request_id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(request_id: String, error: RpcErrorPayload) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            request_id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Error payload structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    /// Code from the registry in [`super::errors::ErrorCode`]
    pub code: String,

    /// Single-line, human-readable message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,
}

impl RpcErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Add machine-readable data to the error
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.get_or_insert_with(HashMap::new).insert(key.into(), value);
        self
    }

    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data.as_ref()?.get(key)?.as_u64()
    }
}

/// Metadata describing the raw bytes that follow a JSON header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub content_length: u64,

    /// SHA-256 hex digest of the raw bytes
    pub content_sha256: String,

    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "tar".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_idempotency() {
        assert!(Operation::Query.is_idempotent());
        assert!(Operation::Retrieve.is_idempotent());
        assert!(!Operation::Enqueue.is_idempotent());
        assert!(!Operation::Commit.is_idempotent());
        assert!(!Operation::RequestToken.is_idempotent());
    }

    #[test]
    fn test_request_parsing() {
        let json = r#"{
            "protocol_version": 1,
            "op": "begin_transaction",
            "request_id": "req-001"
        }"#;

        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.op, Operation::BeginTransaction);
        assert_eq!(req.request_id, "req-001");
        assert!(req.payload.is_null());
    }

    #[test]
    fn test_response_error_serialization() {
        let err = RpcErrorPayload::new("BUSY", "queue is busy")
            .with_data("retry_after_seconds", serde_json::json!(2));
        let resp = RpcResponse::error("req-002".to_string(), err);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["ok"], false);
        assert!(json.get("payload").is_none());
        assert_eq!(json["error"]["code"], "BUSY");
        assert_eq!(resp.error.unwrap().data_u64("retry_after_seconds"), Some(2));
    }
}
