//! Queue client
//!
//! Reaches the pool directory and the job queue through a [`Transport`]:
//! - transport: envelope exchange (ssh gateway or in-process mock)
//! - rpc: request ids, error mapping, transient retries
//! - collector: queue lookup by name
//! - client: typed operations and scoped transactions

mod client;
mod collector;
mod rpc;
mod transport;

pub use client::{ScheddClient, Transaction, IDENTITY_ATTRIBUTES};
pub use collector::{connect, Collector, ScheddAddress};
pub use rpc::{RetryPolicy, RpcClient, RpcError, RpcResult};
pub use transport::{
    build_transport, split_fetch_response, MockTransport, SshTransport, Transport, TransportError,
};
