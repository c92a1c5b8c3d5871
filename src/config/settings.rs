//! Typed view of the merged configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::effective::ConfigError;
use crate::retention::RetentionPolicy;
use crate::schedd::RetryPolicy;
use crate::timeout::WaitTimings;

/// Upper bound for every retry or attempt count
pub const MAX_RETRIES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ssh,
}

/// How to reach the submit host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    pub kind: TransportKind,
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: u16,
    pub key_path: Option<String>,
    pub connect_timeout_seconds: u64,
    pub gateway_command: String,
}

/// Security parameters passed to the gateway for each run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub auth_methods: Vec<String>,
    pub ca_file: Option<String>,
}

/// Per-run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolConfig {
    pub pool: Option<String>,
    pub schedd: Option<String>,
    pub poll_interval_seconds: u64,
    pub deadline_seconds: Option<u64>,
    pub grace_period_seconds: i64,
    pub retrieved_marker: String,
    pub retrieve_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub transient_retries: u32,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub remove_after_retrieve: bool,
    pub debug: bool,
    pub token_dir: String,
    pub token_request_attempts: u32,
    pub transport: TransportSettings,
    pub security: SecuritySettings,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        let defaults = super::BuiltinDefaults::default();
        Self {
            pool: None,
            schedd: None,
            poll_interval_seconds: defaults.poll_interval_seconds,
            deadline_seconds: None,
            grace_period_seconds: defaults.grace_period_seconds,
            retrieved_marker: defaults.retrieved_marker,
            retrieve_retries: defaults.retrieve_retries,
            retry_initial_delay_ms: defaults.retry_initial_delay_ms,
            retry_max_delay_ms: defaults.retry_max_delay_ms,
            transient_retries: defaults.transient_retries,
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            remove_after_retrieve: false,
            debug: false,
            token_dir: defaults.token_dir,
            token_request_attempts: defaults.token_request_attempts,
            transport: TransportSettings {
                kind: TransportKind::Ssh,
                host: None,
                user: None,
                port: 22,
                key_path: None,
                connect_timeout_seconds: defaults.connect_timeout_seconds,
                gateway_command: defaults.gateway_command,
            },
            security: SecuritySettings {
                auth_methods: defaults.auth_methods,
                ca_file: None,
            },
        }
    }
}

impl SpoolConfig {
    /// Deserialize from a merged config value
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value)
            .map_err(|e| ConfigError::ValidationError(format!("invalid configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timings()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        for (name, value) in [
            ("retrieve_retries", self.retrieve_retries),
            ("transient_retries", self.transient_retries),
            ("token_request_attempts", self.token_request_attempts),
        ] {
            if value > MAX_RETRIES {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_RETRIES, value
                )));
            }
        }
        if self.token_request_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "token_request_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "retry_initial_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_initial_delay_ms, self.retry_max_delay_ms
            )));
        }

        if self.grace_period_seconds <= 0 {
            return Err(ConfigError::ValidationError(
                "grace_period_seconds must be positive".to_string(),
            ));
        }

        let marker_ok = self
            .retrieved_marker
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && self
                .retrieved_marker
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !marker_ok {
            return Err(ConfigError::ValidationError(format!(
                "retrieved_marker must be an attribute name, got {:?}",
                self.retrieved_marker
            )));
        }

        let connect = self.transport.connect_timeout_seconds;
        if connect == 0 || connect > 300 {
            return Err(ConfigError::ValidationError(
                "transport.connect_timeout_seconds must be in (0, 300]".to_string(),
            ));
        }

        if self.transport.gateway_command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "transport.gateway_command must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn timings(&self) -> WaitTimings {
        WaitTimings {
            poll_interval_seconds: self.poll_interval_seconds,
            deadline_seconds: self.deadline_seconds,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.grace_period_seconds, self.retrieved_marker.clone())
    }

    /// Policy for transient queue errors
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.transient_retries,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Policy for output fetches
    pub fn retrieve_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retrieve_retries,
            ..self.retry_policy()
        }
    }

    /// Token directory with a leading `~` expanded against `home`
    pub fn token_dir_path(&self, home: Option<&Path>) -> PathBuf {
        expand_home(&self.token_dir, home)
    }
}

fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => home.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = SpoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval_seconds, 5);
        assert_eq!(config.transport.kind, TransportKind::Ssh);
        assert_eq!(config.transport.port, 22);
        assert_eq!(config.security.auth_methods, vec!["SSL"]);
        assert_eq!(config.input_dir, PathBuf::from("."));
    }

    #[test]
    fn test_retry_bounds() {
        let config = SpoolConfig {
            retrieve_retries: 21,
            ..SpoolConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retrieve_retries"));
    }

    #[test]
    fn test_deadline_bound() {
        let config = SpoolConfig {
            poll_interval_seconds: 10,
            deadline_seconds: Some(3),
            ..SpoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_marker_must_be_attribute_name() {
        let config = SpoolConfig {
            retrieved_marker: "not a name".to_string(),
            ..SpoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policies() {
        let config = SpoolConfig::default();
        let retention = config.retention();
        assert_eq!(retention.grace_period_seconds, 259_200);

        let retrieve = config.retrieve_policy();
        assert_eq!(retrieve.max_retries, 3);
        assert_eq!(retrieve.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_token_dir_expansion() {
        let config = SpoolConfig::default();
        assert_eq!(
            config.token_dir_path(Some(Path::new("/home/alice"))),
            PathBuf::from("/home/alice/.condor/tokens.d")
        );
        assert_eq!(
            config.token_dir_path(None),
            PathBuf::from("~/.condor/tokens.d")
        );
    }
}
