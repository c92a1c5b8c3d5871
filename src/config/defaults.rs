//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Seconds between status queries (default: 5)
    pub poll_interval_seconds: u64,

    /// How long completed, unretrieved records stay queued (default: 3 days)
    pub grace_period_seconds: i64,

    /// Attribute set once outputs are retrieved (default: "RETRIEVED")
    pub retrieved_marker: String,

    pub retrieve_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub transient_retries: u32,

    pub token_dir: String,
    pub token_request_attempts: u32,

    /// SSH connection timeout (default: 30)
    pub connect_timeout_seconds: u64,

    /// Command run on the submit host that speaks the queue protocol
    pub gateway_command: String,

    pub auth_methods: Vec<String>,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            grace_period_seconds: crate::retention::DEFAULT_GRACE_PERIOD_SECONDS,
            retrieved_marker: crate::retention::DEFAULT_RETRIEVED_MARKER.to_string(),
            retrieve_retries: 3,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            transient_retries: 3,
            token_dir: "~/.condor/tokens.d".to_string(),
            token_request_attempts: 5,
            connect_timeout_seconds: 30,
            gateway_command: "remote-spool-gateway".to_string(),
            auth_methods: vec!["SSL".to_string()],
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "pool": null,
            "schedd": null,
            "poll_interval_seconds": self.poll_interval_seconds,
            "deadline_seconds": null,
            "grace_period_seconds": self.grace_period_seconds,
            "retrieved_marker": self.retrieved_marker,
            "retrieve_retries": self.retrieve_retries,
            "retry_initial_delay_ms": self.retry_initial_delay_ms,
            "retry_max_delay_ms": self.retry_max_delay_ms,
            "transient_retries": self.transient_retries,
            "input_dir": ".",
            "output_dir": ".",
            "remove_after_retrieve": false,
            "debug": false,
            "token_dir": self.token_dir,
            "token_request_attempts": self.token_request_attempts,
            "transport": {
                "kind": "ssh",
                "host": null,
                "user": null,
                "port": 22,
                "key_path": null,
                "connect_timeout_seconds": self.connect_timeout_seconds,
                "gateway_command": self.gateway_command
            },
            "security": {
                "auth_methods": self.auth_methods,
                "ca_file": null
            }
        })
    }
}
