//! Submit token acquisition
//!
//! A token request is filed with the queue, approved out of band by an
//! administrator, and then fetched and stored in the token directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::SpoolError;
use crate::schedd::{RetryPolicy, RpcError, ScheddClient};
use crate::timeout::Deadline;

/// Authorizations needed to submit and manage jobs remotely
pub const DEFAULT_AUTHORIZATIONS: [&str; 2] = ["READ", "WRITE"];

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("no usable request id after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("token request {request_id} not approved within {waited_seconds}s")]
    NotApproved { request_id: String, waited_seconds: u64 },

    #[error("invalid token name {0:?}")]
    InvalidName(String),

    #[error("cannot write token: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TokenError> for SpoolError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Rpc(RpcError::Cancelled) => SpoolError::Cancelled,
            TokenError::NotApproved { waited_seconds, .. } => SpoolError::TimedOut { waited_seconds },
            TokenError::InvalidName(_) => SpoolError::Config(err.to_string()),
            _ => SpoolError::RemoteQuery(err.to_string()),
        }
    }
}

/// Default file name for a token issued by `schedd`
pub fn default_token_name(schedd: &str) -> String {
    format!("remote-submit-for-{}", schedd)
}

/// File a token request and return its id.
///
/// Some registration servers hand out ids with a leading `0` that cannot be
/// approved; those requests are filed again, at most `max_attempts` times.
pub fn request_token(
    client: &ScheddClient,
    identity: &str,
    authorizations: &[String],
    max_attempts: u32,
    retry: RetryPolicy,
) -> Result<String, TokenError> {
    for attempt in 1..=max_attempts {
        let request_id = client.request_token(identity, authorizations)?;
        if !request_id.starts_with('0') {
            info!(request_id = %request_id, identity, "token requested");
            return Ok(request_id);
        }
        warn!(request_id = %request_id, attempt, "unusable request id, requesting again");
        if attempt < max_attempts {
            client
                .cancel_token()
                .sleep(retry.backoff(attempt))
                .map_err(|_| RpcError::Cancelled)?;
        }
    }
    Err(TokenError::Exhausted {
        attempts: max_attempts,
    })
}

/// Poll until the request is approved and return the token
pub fn await_token(
    client: &ScheddClient,
    request_id: &str,
    interval: Duration,
    deadline: Option<Duration>,
) -> Result<String, TokenError> {
    let deadline = Deadline::new(deadline);
    loop {
        match client.fetch_token(request_id) {
            Ok(token) => {
                info!(request_id, "token approved");
                return Ok(token);
            }
            Err(RpcError::Pending(_)) => debug!(request_id, "token request pending"),
            Err(e) => return Err(e.into()),
        }
        if deadline.is_expired() {
            return Err(TokenError::NotApproved {
                request_id: request_id.to_string(),
                waited_seconds: deadline.elapsed().as_secs(),
            });
        }
        client
            .cancel_token()
            .sleep(deadline.truncate(interval))
            .map_err(|_| RpcError::Cancelled)?;
    }
}

/// Store a token as `dir/name`. The directory is private to the user
/// (0700) and so is the file (0600).
pub fn write_token(dir: &Path, name: &str, token: &str) -> Result<PathBuf, TokenError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(TokenError::InvalidName(name.to_string()));
    }

    fs::create_dir_all(dir)?;
    restrict(dir, 0o700)?;

    let path = dir.join(name);
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&path)?;
    file.write_all(token.as_bytes())?;
    file.write_all(b"\n")?;
    restrict(&path, 0o600)?;

    info!(path = %path.display(), "token written");
    Ok(path)
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
