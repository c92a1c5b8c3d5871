//! Effective configuration with full provenance
//!
//! The effective config captures the merged configuration plus information
//! about where each value came from. Secrets are redacted in the recorded
//! copy; the typed settings are taken before redaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::SpoolConfig;

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_ID: &str = "remote-spool/effective_config@1";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    File,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,

    /// The merged configuration object, secrets redacted
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,

    #[serde(skip)]
    settings: SpoolConfig,
}

/// Keys whose values are secrets. Matched exactly so that e.g. `token_dir`
/// stays visible.
const SECRET_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "private_key",
    "api_key",
    "credential",
];

impl EffectiveConfig {
    /// Build effective config from layers.
    ///
    /// A missing user config is skipped; a missing explicit file is an error.
    pub fn build(
        user_config_path: Option<&Path>,
        explicit_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        if let Some(path) = user_config_path.filter(|p| p.exists()) {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::User,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(path) = explicit_config_path {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let mut merged = merge_layers(layers);

        let settings = SpoolConfig::from_value(merged.clone())?;
        settings.validate()?;

        let redactions = Self::redact_secrets(&mut merged);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
            redactions,
            settings,
        })
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    fn redact_secrets(value: &mut Value) -> Vec<String> {
        let mut redactions = Vec::new();
        Self::redact_recursive(value, String::new(), &mut redactions);
        redactions
    }

    fn redact_recursive(value: &mut Value, path: String, redactions: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let current_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };

                    let is_secret = SECRET_KEYS.iter().any(|s| key.eq_ignore_ascii_case(s));

                    if is_secret && !val.is_object() && !val.is_array() && !val.is_null() {
                        *val = Value::String("[REDACTED]".to_string());
                        redactions.push(current_path);
                    } else {
                        Self::redact_recursive(val, current_path, redactions);
                    }
                }
            }
            Value::Array(arr) => {
                for (i, val) in arr.iter_mut().enumerate() {
                    Self::redact_recursive(val, format!("{}[{}]", path, i), redactions);
                }
            }
            _ => {}
        }
    }

    /// Typed settings for this run
    pub fn settings(&self) -> &SpoolConfig {
        &self.settings
    }

    pub fn into_settings(self) -> SpoolConfig {
        self.settings
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON serialization failed: {}", e),
            )
        })?;
        fs::write(path, json)
    }

    /// Get a config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_build_with_defaults_only() {
        let config = EffectiveConfig::build(None, None, None).unwrap();

        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.get_u64("poll_interval_seconds"), Some(5));
        assert_eq!(config.get_str("transport.kind"), Some("ssh"));
        assert_eq!(config.settings().retrieved_marker, "RETRIEVED");
    }

    #[test]
    fn test_build_with_cli_override() {
        let cli = serde_json::json!({"schedd": "schedd@submit.example.org", "debug": true});
        let config = EffectiveConfig::build(None, None, Some(cli)).unwrap();

        assert_eq!(config.settings().schedd.as_deref(), Some("schedd@submit.example.org"));
        assert_eq!(config.get_bool("debug"), Some(true));
    }

    #[test]
    fn test_validation_poll_interval() {
        let cli = serde_json::json!({"poll_interval_seconds": 0});
        let err = EffectiveConfig::build(None, None, Some(cli)).unwrap_err();
        assert!(err.to_string().contains("poll_interval_seconds"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let cli = serde_json::json!({"retrieve_retries": "many"});
        assert!(matches!(
            EffectiveConfig::build(None, None, Some(cli)),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_secret_redaction_is_exact() {
        let cli = serde_json::json!({
            "token_dir": "/tmp/tokens",
            "security": {"token": "eyJhbGciOi", "password": "hunter2"}
        });
        let config = EffectiveConfig::build(None, None, Some(cli)).unwrap();

        assert_eq!(config.get_str("token_dir"), Some("/tmp/tokens"));
        assert_eq!(config.get_str("security.token"), Some("[REDACTED]"));
        assert_eq!(config.get_str("security.password"), Some("[REDACTED]"));
        assert!(config.redactions.contains(&"security.token".to_string()));
        assert_eq!(config.settings().token_dir, "/tmp/tokens");
    }

    #[test]
    fn test_layers_from_files() {
        let mut user = NamedTempFile::new().unwrap();
        writeln!(user, "pool = \"cm.example.org\"").unwrap();
        writeln!(user, "poll_interval_seconds = 30").unwrap();
        writeln!(user, "[transport]").unwrap();
        writeln!(user, "host = \"submit.example.org\"").unwrap();

        let mut explicit = NamedTempFile::new().unwrap();
        writeln!(explicit, "poll_interval_seconds = 10").unwrap();

        let config =
            EffectiveConfig::build(Some(user.path()), Some(explicit.path()), None).unwrap();

        let settings = config.settings();
        assert_eq!(settings.pool.as_deref(), Some("cm.example.org"));
        assert_eq!(settings.poll_interval_seconds, 10);
        assert_eq!(settings.transport.host.as_deref(), Some("submit.example.org"));
        assert_eq!(settings.transport.port, 22);

        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.sources[1].origin, ConfigOrigin::User);
        assert_eq!(config.sources[2].origin, ConfigOrigin::File);
        assert_eq!(config.sources[2].digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_missing_user_config_skipped_but_explicit_required() {
        let missing = Path::new("/nonexistent/remote-spool/config.toml");
        let config = EffectiveConfig::build(Some(missing), None, None).unwrap();
        assert_eq!(config.sources.len(), 1);

        assert!(matches!(
            EffectiveConfig::build(None, Some(missing), None),
            Err(ConfigError::IoError(_))
        ));
    }
}
