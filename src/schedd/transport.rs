//! Transport layer for the queue client
//!
//! Abstracts the connection to the queue gateway for testability:
//! - Transport trait: interface for envelope exchange
//! - MockTransport: in-process mock queue for tests
//! - SshTransport: gateway command on the submit host, reached over ssh

use std::io::{self, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::{SecuritySettings, SpoolConfig, TransportKind, TransportSettings};
use crate::mock::MockSchedd;
use crate::protocol::{RpcRequest, RpcResponse};

/// Transport trait for envelope exchange
pub trait Transport: Send + Sync {
    /// Send a request and return the response
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError>;

    /// Send a request followed by raw upload bytes
    fn execute_framed(
        &self,
        request: &RpcRequest,
        content: &[u8],
    ) -> Result<RpcResponse, TransportError>;

    /// Send a request; the response header may be followed by raw bytes
    fn execute_fetch(
        &self,
        request: &RpcRequest,
    ) -> Result<(RpcResponse, Option<Vec<u8>>), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Transport not configured: {0}")]
    NotConfigured(String),
}

/// Transport backed by an in-process [`MockSchedd`]
pub struct MockTransport {
    schedd: MockSchedd,
    /// Pending simulated connection drops
    drops: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_schedd(MockSchedd::new())
    }

    pub fn with_schedd(schedd: MockSchedd) -> Self {
        Self {
            schedd,
            drops: AtomicU32::new(0),
        }
    }

    /// The queue behind this transport, for test configuration
    pub fn schedd(&self) -> &MockSchedd {
        &self.schedd
    }

    /// Fail the next `count` exchanges before they reach the queue
    pub fn drop_connections(&self, count: u32) {
        self.drops.store(count, Ordering::SeqCst);
    }

    fn check_connection(&self) -> Result<(), TransportError> {
        let dropped = self
            .drops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Err(TransportError::ConnectionFailed(
                "connection reset by peer".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        self.check_connection()?;
        Ok(self.schedd.handle_request(request))
    }

    fn execute_framed(
        &self,
        request: &RpcRequest,
        content: &[u8],
    ) -> Result<RpcResponse, TransportError> {
        self.check_connection()?;
        Ok(self.schedd.handle_framed(request, content))
    }

    fn execute_fetch(
        &self,
        request: &RpcRequest,
    ) -> Result<(RpcResponse, Option<Vec<u8>>), TransportError> {
        self.check_connection()?;
        Ok(self.schedd.handle_fetch(request))
    }
}

const SERVER_ALIVE_INTERVAL: u32 = 15;
const SERVER_ALIVE_COUNT_MAX: u32 = 2;

/// Runs the gateway command on the submit host over ssh.
///
/// One JSON request line on stdin (followed by upload bytes for framed
/// requests); one JSON response line on stdout (followed by download bytes
/// for fetches).
pub struct SshTransport {
    host: String,
    settings: TransportSettings,
    security: SecuritySettings,
}

impl SshTransport {
    pub fn new(settings: TransportSettings, security: SecuritySettings) -> Result<Self, TransportError> {
        let host = settings
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| TransportError::NotConfigured("transport.host is not set".to_string()))?;
        Ok(Self {
            host,
            settings,
            security,
        })
    }

    fn build_ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_seconds),
            "-o".to_string(),
            format!("ServerAliveInterval={}", SERVER_ALIVE_INTERVAL),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", SERVER_ALIVE_COUNT_MAX),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.settings.port.to_string(),
        ];

        if let Some(ref key_path) = self.settings.key_path {
            args.push("-i".to_string());
            args.push(key_path.clone());
        }

        match self.settings.user {
            Some(ref user) => args.push(format!("{}@{}", user, self.host)),
            None => args.push(self.host.clone()),
        }

        args.extend(self.settings.gateway_command.split_whitespace().map(String::from));

        if !self.security.auth_methods.is_empty() {
            args.push("--auth-methods".to_string());
            args.push(self.security.auth_methods.join(","));
        }
        if let Some(ref ca_file) = self.security.ca_file {
            args.push("--ca-file".to_string());
            args.push(ca_file.clone());
        }

        args
    }

    /// Run one exchange and return raw stdout
    fn exchange(&self, request: &RpcRequest, content: Option<&[u8]>) -> Result<Vec<u8>, TransportError> {
        let args = self.build_ssh_args();
        let request_json = serde_json::to_string(request)?;
        debug!(op = %request.op, request_id = %request.request_id, host = %self.host, "ssh exchange");

        let mut child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Ssh(format!("Failed to spawn SSH: {}", e)))?;

        send_request(&mut child, &request_json, content)?;

        let output = child
            .wait_with_output()
            .map_err(|e| TransportError::Ssh(format!("SSH process error: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Ssh(format!(
                "SSH exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

/// Write the request to the child's stdin and close it. A child that stops
/// reading is killed and reaped before the error is returned.
fn send_request(child: &mut Child, request_json: &str, content: Option<&[u8]>) -> Result<(), TransportError> {
    let Some(mut stdin) = child.stdin.take() else {
        return Ok(());
    };
    let written = writeln!(stdin, "{}", request_json)
        .and_then(|_| content.map_or(Ok(()), |bytes| stdin.write_all(bytes)))
        .and_then(|_| stdin.flush());
    drop(stdin);

    if let Err(e) = written {
        let _ = child.kill();
        let _ = child.wait();
        return Err(TransportError::Ssh(format!("Failed to send request: {}", e)));
    }
    Ok(())
}

fn parse_response(bytes: &[u8]) -> Result<RpcResponse, TransportError> {
    serde_json::from_slice(bytes)
        .map_err(|e| TransportError::Protocol(format!("Invalid response JSON: {}", e)))
}

/// Split a fetch response into its JSON header line and trailing bytes
pub fn split_fetch_response(stdout: &[u8]) -> Result<(RpcResponse, Option<Vec<u8>>), TransportError> {
    match stdout.iter().position(|&b| b == b'\n') {
        Some(newline_pos) => {
            let header = &stdout[..newline_pos];
            let content = &stdout[newline_pos + 1..];
            let response: RpcResponse = serde_json::from_slice(header)
                .map_err(|e| TransportError::Protocol(format!("Invalid response header: {}", e)))?;
            let body = if response.ok && !content.is_empty() {
                Some(content.to_vec())
            } else {
                None
            };
            Ok((response, body))
        }
        None => Ok((parse_response(stdout)?, None)),
    }
}

impl Transport for SshTransport {
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        parse_response(&self.exchange(request, None)?)
    }

    fn execute_framed(
        &self,
        request: &RpcRequest,
        content: &[u8],
    ) -> Result<RpcResponse, TransportError> {
        parse_response(&self.exchange(request, Some(content))?)
    }

    fn execute_fetch(
        &self,
        request: &RpcRequest,
    ) -> Result<(RpcResponse, Option<Vec<u8>>), TransportError> {
        split_fetch_response(&self.exchange(request, None)?)
    }
}

/// Build the transport a configuration asks for
pub fn build_transport(config: &SpoolConfig) -> Result<Arc<dyn Transport>, TransportError> {
    match config.transport.kind {
        TransportKind::Ssh => Ok(Arc::new(SshTransport::new(
            config.transport.clone(),
            config.security.clone(),
        )?)),
    }
}
