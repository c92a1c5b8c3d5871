//! Queue gateway protocol types
//!
//! The JSON envelope exchanged with the pool directory and the job queue,
//! the typed payload of each operation, and the error code registry both
//! sides agree on.

pub mod envelope;
pub mod errors;
pub mod payloads;

pub use envelope::{
    Operation, RpcErrorPayload, RpcRequest, RpcResponse, StreamMetadata, PROTOCOL_VERSION,
};
pub use errors::{ErrorCode, QueueError};
pub use payloads::{EditOutcome, JobAction};
