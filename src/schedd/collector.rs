//! Pool directory lookups

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cancel::CancelToken;
use crate::config::SpoolConfig;
use crate::error::SpoolError;
use crate::protocol::payloads::{LocateRequest, LocateResponse};
use crate::protocol::Operation;

use super::client::ScheddClient;
use super::rpc::{RetryPolicy, RpcClient, RpcError};
use super::transport::Transport;

/// Where a queue can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheddAddress {
    pub name: String,
    pub address: String,
}

/// Pool directory service
pub struct Collector {
    rpc: RpcClient,
    pool: Option<String>,
}

impl Collector {
    pub fn new(transport: Arc<dyn Transport>, pool: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            rpc: RpcClient::new(transport, retry),
            pool,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.rpc = self.rpc.with_cancel(cancel);
        self
    }

    /// Look up a queue by name, or the pool's default queue when `name` is `None`
    pub fn locate(&self, name: Option<&str>) -> Result<ScheddAddress, SpoolError> {
        let request = LocateRequest {
            pool: self.pool.clone(),
            name: name.map(String::from),
        };
        let wanted = name.unwrap_or("<default>").to_string();

        match self.rpc.call::<_, LocateResponse>(Operation::Locate, &request) {
            Ok(found) => {
                info!(schedd = %found.name, address = %found.address, "located queue");
                Ok(ScheddAddress {
                    name: found.name,
                    address: found.address,
                })
            }
            Err(RpcError::Cancelled) => Err(SpoolError::Cancelled),
            Err(e) => Err(SpoolError::EndpointNotFound {
                name: wanted,
                message: e.to_string(),
            }),
        }
    }
}

/// Locate the configured queue and return a client bound to it
pub fn connect(
    transport: Arc<dyn Transport>,
    config: &SpoolConfig,
    cancel: CancelToken,
) -> Result<ScheddClient, SpoolError> {
    let retry = config.retry_policy();
    let collector = Collector::new(transport.clone(), config.pool.clone(), retry)
        .with_cancel(cancel.clone());
    let address = collector.locate(config.schedd.as_deref())?;
    Ok(ScheddClient::new(transport, address, retry).with_cancel(cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailureConfig, DEFAULT_SCHEDD_NAME};
    use crate::schedd::MockTransport;

    fn collector(transport: &Arc<MockTransport>) -> Collector {
        Collector::new(transport.clone(), Some("pool.example.org".to_string()), RetryPolicy::none())
    }

    #[test]
    fn test_locate_default_and_named() {
        let transport = Arc::new(MockTransport::new());
        transport.schedd().register_schedd("submit-2", "<10.0.0.2:9618>");
        let collector = collector(&transport);

        assert_eq!(collector.locate(None).unwrap().name, DEFAULT_SCHEDD_NAME);
        let named = collector.locate(Some("submit-2")).unwrap();
        assert_eq!(named.address, "<10.0.0.2:9618>");
    }

    #[test]
    fn test_locate_unknown_is_endpoint_not_found() {
        let transport = Arc::new(MockTransport::new());
        let err = collector(&transport).locate(Some("missing")).unwrap_err();
        match err {
            SpoolError::EndpointNotFound { name, .. } => assert_eq!(name, "missing"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_locate_unreachable_directory() {
        let transport = Arc::new(MockTransport::new());
        transport
            .schedd()
            .inject_failure(Operation::Locate, FailureConfig::unavailable());
        let err = collector(&transport).locate(None).unwrap_err();
        assert!(matches!(err, SpoolError::EndpointNotFound { .. }));
    }

    #[test]
    fn test_connect_uses_configured_name() {
        let transport = Arc::new(MockTransport::new());
        transport.schedd().register_schedd("submit-3", "<10.0.0.3:9618>");
        let config = SpoolConfig {
            schedd: Some("submit-3".to_string()),
            ..SpoolConfig::default()
        };
        let client = connect(transport, &config, CancelToken::new()).unwrap();
        assert_eq!(client.address().name, "submit-3");
    }
}
