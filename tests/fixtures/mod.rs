//! Shared setup for integration tests: a mock queue behind a transport,
//! temporary input and output directories, and a config pointing at them.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use remote_spool::cancel::CancelToken;
use remote_spool::job::{ItemData, JobDescription};
use remote_spool::mock::MockSchedd;
use remote_spool::protocol::{Operation, RpcRequest, RpcResponse};
use remote_spool::schedd::{connect, MockTransport, ScheddClient, Transport, TransportError};
use remote_spool::SpoolConfig;
use tempfile::TempDir;

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub input: TempDir,
    pub output: TempDir,
    pub config: SpoolConfig,
}

impl Harness {
    pub fn new() -> Self {
        let input = TempDir::new().expect("input dir");
        let output = TempDir::new().expect("output dir");
        let config = SpoolConfig {
            input_dir: input.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            poll_interval_seconds: 1,
            retry_initial_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..SpoolConfig::default()
        };
        Self {
            transport: Arc::new(MockTransport::new()),
            input,
            output,
            config,
        }
    }

    pub fn schedd(&self) -> &MockSchedd {
        self.transport.schedd()
    }

    pub fn client(&self) -> ScheddClient {
        self.client_with_cancel(CancelToken::new())
    }

    pub fn client_with_cancel(&self, cancel: CancelToken) -> ScheddClient {
        connect(self.transport.clone(), &self.config, cancel).expect("locate mock queue")
    }

    /// Client over a transport wrapping this harness's mock queue
    pub fn client_over(&self, transport: Arc<dyn Transport>) -> ScheddClient {
        connect(transport, &self.config, CancelToken::new()).expect("locate mock queue")
    }

    pub fn write_input(&self, name: &str, content: &[u8]) {
        let path = self.input.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read_output(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.output.path().join(name)).unwrap()
    }

    pub fn output_exists(&self, name: &str) -> bool {
        self.output.path().join(name).exists()
    }

    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }
}

/// `cat` over one input per instance, stdout remapped per instance
pub fn cat_description() -> JobDescription {
    [
        ("executable", "/bin/cat"),
        ("arguments", "$(name)"),
        ("transfer_input_files", "$(name)"),
        ("output", "out-$(ProcId).txt"),
        ("error", "err-$(ProcId).txt"),
    ]
    .into_iter()
    .collect()
}

pub fn items(names: &[&str]) -> ItemData {
    names
        .iter()
        .map(|n| BTreeMap::from([("name".to_string(), n.to_string())]))
        .collect()
}

/// How an intercepted edit fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditFault {
    /// The queue applies the edit but the response never arrives
    LoseResponse,
    /// The connection drops before the queue sees the edit
    Reject,
}

/// Fails the next edits of one attribute, passing everything else through
pub struct FlakyEdits {
    inner: Arc<MockTransport>,
    attribute: String,
    fault: EditFault,
    remaining: AtomicU32,
}

impl FlakyEdits {
    pub fn new(inner: Arc<MockTransport>, attribute: &str, fault: EditFault, count: u32) -> Self {
        Self {
            inner,
            attribute: attribute.to_string(),
            fault,
            remaining: AtomicU32::new(count),
        }
    }

    /// Stop failing edits
    pub fn heal(&self) {
        self.remaining.store(0, Ordering::SeqCst);
    }

    fn intercepts(&self, request: &RpcRequest) -> bool {
        request.op == Operation::Edit
            && request.payload["attribute"] == self.attribute.as_str()
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

impl Transport for FlakyEdits {
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        if !self.intercepts(request) {
            return self.inner.execute(request);
        }
        if self.fault == EditFault::LoseResponse {
            self.inner.execute(request)?;
        }
        Err(TransportError::ConnectionFailed(format!(
            "connection reset during edit of {}",
            self.attribute
        )))
    }

    fn execute_framed(
        &self,
        request: &RpcRequest,
        content: &[u8],
    ) -> Result<RpcResponse, TransportError> {
        self.inner.execute_framed(request, content)
    }

    fn execute_fetch(
        &self,
        request: &RpcRequest,
    ) -> Result<(RpcResponse, Option<Vec<u8>>), TransportError> {
        self.inner.execute_fetch(request)
    }
}
