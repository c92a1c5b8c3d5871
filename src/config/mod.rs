//! Configuration merge system
//!
//! Implements the 4-layer configuration merge:
//! 1. Built-in defaults
//! 2. User config (~/.config/remote-spool/config.toml)
//! 3. Explicit config file (`--config`)
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
pub use settings::{SecuritySettings, SpoolConfig, TransportKind, TransportSettings};

/// Location of the per-user config file under `home`
pub fn user_config_path(home: &std::path::Path) -> std::path::PathBuf {
    home.join(".config").join("remote-spool").join("config.toml")
}
