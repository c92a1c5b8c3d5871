//! Failure injection for the mock queue

use std::collections::HashMap;
use std::time::Duration;

use crate::protocol::{ErrorCode, Operation, RpcErrorPayload};

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Error code to return (if any)
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
    /// Retry-after seconds for BUSY errors
    pub retry_after_seconds: Option<u32>,
}

impl FailureConfig {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code),
            error_message: Some(message.into()),
            delay: None,
            fail_count: None,
            retry_after_seconds: None,
        }
    }

    /// BUSY with a retry-after hint
    pub fn busy(retry_after_seconds: u32) -> Self {
        Self {
            retry_after_seconds: Some(retry_after_seconds),
            ..Self::error(ErrorCode::Busy, "queue at capacity")
        }
    }

    pub fn unavailable() -> Self {
        Self::error(ErrorCode::Unavailable, "queue daemon not responding")
    }

    /// Only delay the response
    pub fn delay(duration: Duration) -> Self {
        Self {
            error_code: None,
            error_message: None,
            delay: Some(duration),
            fail_count: None,
            retry_after_seconds: None,
        }
    }

    /// Fail `count` times, then succeed
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    /// Error payload to answer with, if this config injects an error
    pub fn to_payload(&self) -> Option<RpcErrorPayload> {
        let code = self.error_code?;
        let message = self
            .error_message
            .clone()
            .unwrap_or_else(|| "injected failure".to_string());
        let mut payload = RpcErrorPayload::new(code.as_str(), message);
        if let Some(retry_after) = self.retry_after_seconds {
            payload = payload.with_data("retry_after_seconds", serde_json::json!(retry_after));
        }
        Some(payload)
    }
}

/// Per-operation failure table
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<Operation, FailureConfig>,
    /// Calls seen per operation, for fail_count tracking
    call_counts: HashMap<Operation, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, op: Operation, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    pub fn inject_error(&mut self, op: Operation, code: ErrorCode, message: impl Into<String>) {
        self.inject(op, FailureConfig::error(code, message));
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_op(&mut self, op: &Operation) {
        self.configs.remove(op);
        self.call_counts.remove(op);
    }

    /// The failure to apply to this call of `op`, if any
    pub fn check(&mut self, op: &Operation) -> Option<&FailureConfig> {
        let config = self.configs.get(op)?;
        let count = self.call_counts.entry(*op).or_insert(0);
        *count += 1;

        if let Some(fail_limit) = config.fail_count {
            if *count > fail_limit {
                return None;
            }
        }
        Some(config)
    }
}
