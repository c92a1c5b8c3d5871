//! Error code registry shared by the queue side and the client side.

use super::envelope::RpcErrorPayload;

/// Standard error codes carried in [`RpcErrorPayload::code`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Named queue, transaction, job or token request does not exist
    NotFound,
    /// Malformed payload or unparsable constraint
    InvalidRequest,
    /// Transaction could not be opened, extended or committed
    TransactionFailed,
    /// Archive upload or download failed
    TransferFailed,
    /// Queue at capacity; retry later
    Busy,
    /// Queue or directory temporarily unreachable
    Unavailable,
    /// Token request not yet approved
    Pending,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::TransactionFailed => "TRANSACTION_FAILED",
            ErrorCode::TransferFailed => "TRANSFER_FAILED",
            ErrorCode::Busy => "BUSY",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::Pending => "PENDING",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "NOT_FOUND" => Some(ErrorCode::NotFound),
            "INVALID_REQUEST" => Some(ErrorCode::InvalidRequest),
            "TRANSACTION_FAILED" => Some(ErrorCode::TransactionFailed),
            "TRANSFER_FAILED" => Some(ErrorCode::TransferFailed),
            "BUSY" => Some(ErrorCode::Busy),
            "UNAVAILABLE" => Some(ErrorCode::Unavailable),
            "PENDING" => Some(ErrorCode::Pending),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fault raised by the queue while handling a request
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Queue busy; retry after {retry_after_seconds} seconds")]
    Busy { retry_after_seconds: u32 },

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Token request {0} is awaiting approval")]
    Pending(String),
}

impl QueueError {
    pub fn code(&self) -> ErrorCode {
        match self {
            QueueError::NotFound { .. } => ErrorCode::NotFound,
            QueueError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            QueueError::TransactionFailed(_) => ErrorCode::TransactionFailed,
            QueueError::TransferFailed(_) => ErrorCode::TransferFailed,
            QueueError::Busy { .. } => ErrorCode::Busy,
            QueueError::Unavailable(_) => ErrorCode::Unavailable,
            QueueError::Pending(_) => ErrorCode::Pending,
        }
    }

    pub fn to_payload(&self) -> RpcErrorPayload {
        let payload = RpcErrorPayload::new(self.code().as_str(), self.to_string());
        match self {
            QueueError::NotFound { name, .. } => payload.with_data("name", serde_json::json!(name)),
            QueueError::Busy { retry_after_seconds } => {
                payload.with_data("retry_after_seconds", serde_json::json!(retry_after_seconds))
            }
            _ => payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip_names() {
        for code in [
            ErrorCode::NotFound,
            ErrorCode::InvalidRequest,
            ErrorCode::TransactionFailed,
            ErrorCode::TransferFailed,
            ErrorCode::Busy,
            ErrorCode::Unavailable,
            ErrorCode::Pending,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("SOMETHING_ELSE"), None);
    }

    #[test]
    fn test_busy_payload_carries_retry_after() {
        let payload = QueueError::Busy { retry_after_seconds: 3 }.to_payload();
        assert_eq!(payload.code, "BUSY");
        assert!(payload.message.contains("3 seconds"));
        assert_eq!(payload.data_u64("retry_after_seconds"), Some(3));
    }

    #[test]
    fn test_not_found_payload_names_target() {
        let payload = QueueError::NotFound {
            what: "schedd",
            name: "submit-1".to_string(),
        }
        .to_payload();
        assert_eq!(payload.code, "NOT_FOUND");
        assert_eq!(payload.message, "schedd not found: submit-1");
    }
}
