//! Envelope-level client
//!
//! Builds requests, maps error payloads to typed errors, and retries
//! transient failures of idempotent operations with bounded backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::protocol::{ErrorCode, Operation, RpcErrorPayload, RpcRequest, RpcResponse};

use super::transport::{Transport, TransportError};

/// Used when a BUSY response carries no hint
const DEFAULT_RETRY_AFTER_SECONDS: u64 = 30;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): initial * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Queue busy: retry after {retry_after_seconds}s")]
    Busy { retry_after_seconds: u64 },

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Pending: {0}")]
    Pending(String),

    #[error("Cancelled")]
    Cancelled,
}

impl RpcError {
    /// Map an error payload from the queue
    pub fn from_payload(error: &RpcErrorPayload) -> Self {
        let message = error.message.clone();
        match ErrorCode::parse(&error.code) {
            Some(ErrorCode::NotFound) => RpcError::NotFound(message),
            Some(ErrorCode::InvalidRequest) => RpcError::InvalidRequest(message),
            Some(ErrorCode::TransactionFailed) => RpcError::TransactionFailed(message),
            Some(ErrorCode::TransferFailed) => RpcError::TransferFailed(message),
            Some(ErrorCode::Busy) => RpcError::Busy {
                retry_after_seconds: error
                    .data_u64("retry_after_seconds")
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECONDS),
            },
            Some(ErrorCode::Unavailable) => RpcError::Unavailable(message),
            Some(ErrorCode::Pending) => RpcError::Pending(message),
            None => RpcError::Protocol(format!("{}: {}", error.code, message)),
        }
    }

    /// Worth retrying an idempotent operation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::Busy { .. } | RpcError::Unavailable(_)
        )
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Envelope client over a transport
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    cancel: CancelToken,
    request_counter: AtomicU64,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            cancel: CancelToken::new(),
            request_counter: AtomicU64::new(0),
        }
    }

    /// Abort retry waits when this token fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Generate a unique request ID
    fn next_request_id(&self) -> String {
        let counter = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("req-{:x}-{:08x}", timestamp, counter)
    }

    fn request<P: Serialize>(&self, op: Operation, payload: &P) -> RpcResult<RpcRequest> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| RpcError::Protocol(format!("cannot encode {} payload: {}", op, e)))?;
        Ok(RpcRequest::new(op, self.next_request_id(), payload))
    }

    /// Send a request and decode the success payload
    pub fn call<P: Serialize, R: DeserializeOwned>(&self, op: Operation, payload: &P) -> RpcResult<R> {
        let request = self.request(op, payload)?;
        let response = self.with_retry(op, || self.transport.execute(&request))?;
        decode(op, response)
    }

    /// Send a request followed by upload bytes
    pub fn call_framed<P: Serialize, R: DeserializeOwned>(
        &self,
        op: Operation,
        payload: &P,
        content: &[u8],
    ) -> RpcResult<R> {
        let request = self.request(op, payload)?;
        let response = self.with_retry(op, || self.transport.execute_framed(&request, content))?;
        decode(op, response)
    }

    /// Send a request whose response carries download bytes
    pub fn call_fetch<P: Serialize, R: DeserializeOwned>(
        &self,
        op: Operation,
        payload: &P,
    ) -> RpcResult<(R, Vec<u8>)> {
        let request = self.request(op, payload)?;
        let mut body = None;
        let response = self.with_retry(op, || {
            let (response, content) = self.transport.execute_fetch(&request)?;
            body = content;
            Ok(response)
        })?;
        let header = decode(op, response)?;
        Ok((header, body.unwrap_or_default()))
    }

    /// Run one exchange, retrying transient failures when `op` is idempotent
    fn with_retry<F>(&self, op: Operation, mut exchange: F) -> RpcResult<RpcResponse>
    where
        F: FnMut() -> Result<RpcResponse, TransportError>,
    {
        let max_retries = if op.is_idempotent() {
            self.retry.max_retries
        } else {
            0
        };
        let mut attempt = 0;

        loop {
            let err = match exchange() {
                Ok(response) if response.ok => return Ok(response),
                Ok(response) => response_error(&response),
                Err(e) => RpcError::Transport(e),
            };

            if !err.is_transient() || attempt >= max_retries {
                return Err(err);
            }
            attempt += 1;

            let delay = match err {
                RpcError::Busy { retry_after_seconds } => {
                    Duration::from_secs(retry_after_seconds).min(self.retry.max_delay)
                }
                _ => self.retry.backoff(attempt),
            };
            warn!(%op, attempt, max_retries, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            self.cancel.sleep(delay).map_err(|_| RpcError::Cancelled)?;
        }
    }
}

fn response_error(response: &RpcResponse) -> RpcError {
    match response.error {
        Some(ref error) => RpcError::from_payload(error),
        None => RpcError::Protocol("error response without error payload".to_string()),
    }
}

fn decode<R: DeserializeOwned>(op: Operation, response: RpcResponse) -> RpcResult<R> {
    let payload = response.payload.unwrap_or(serde_json::Value::Null);
    debug!(%op, request_id = %response.request_id, "response ok");
    serde_json::from_value(payload)
        .map_err(|e| RpcError::Protocol(format!("malformed {} response: {}", op, e)))
}
