//! Bridge configuration (pawnbridge.toml)
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::hook::HookMode;
use crate::registry::ArrayLengthTable;

/// Name of the configuration file looked up next to the server
pub const CONFIG_FILE_NAME: &str = "pawnbridge.toml";

/// Errors that can occur while loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Definition file locations
    pub files: FilesConfig,

    /// Hook installation
    pub hooks: HooksConfig,

    /// Log output
    pub logging: LoggingConfig,

    /// Outbound native calls
    pub invoke: InvokeConfig,

    /// Database worker timing
    pub database: DatabaseConfig,
}

/// Definition file locations, relative to the server's working directory
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Callback declarations
    pub callbacks: PathBuf,
    /// Natives the script host may provide
    pub natives: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            callbacks: PathBuf::from("data/server/callbacks.txt"),
            natives: PathBuf::from("data/server/natives.txt"),
        }
    }
}

/// Hook installation settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// How runtime functions are redirected
    pub mode: HookMode,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives, overridden by `RUST_LOG` when set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Outbound native call settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InvokeConfig {
    /// Per native, distance from each array argument to its length
    pub array_length_offsets: ArrayLengthTable,
}

/// Database client used by new connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// A MySQL or MariaDB server
    #[default]
    Mysql,
    /// A SQLite database file
    Sqlite,
}

/// Database driver and worker timing (in milliseconds)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Client used by new connections
    pub driver: DatabaseDriver,
    /// Sleep between worker iterations
    pub poll_interval_ms: u64,
    /// Minimum delay between connection attempts
    pub retry_interval_ms: u64,
    /// Keep-alive interval while connected
    pub ping_interval_ms: u64,
    /// Queries still executed when a connection closes
    pub drain_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            poll_interval_ms: 25,
            retry_interval_ms: 5000,
            ping_interval_ms: 5000,
            drain_limit: 50,
        }
    }
}

impl DatabaseConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry interval as a duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Ping interval as a duration
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

impl BridgeConfig {
    /// Load a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `pawnbridge.toml` from `dir`, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BridgeConfig::from_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.files.callbacks, PathBuf::from("data/server/callbacks.txt"));
        assert_eq!(config.hooks.mode, HookMode::Inline);
        assert_eq!(config.database.driver, DatabaseDriver::Mysql);
        assert_eq!(config.database.drain_limit, 50);
        assert_eq!(config.database.poll_interval(), Duration::from_millis(25));
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
[hooks]
mode = "export-table"

[logging]
filter = "pawnbridge_engine=debug"

[invoke.array_length_offsets]
CreateDynamicObjectEx = [5]
CreateDynamicPolygonEx = [3, 4]

[database]
driver = "sqlite"
retry_interval_ms = 1000
"#;

        let config = BridgeConfig::from_str(toml).unwrap();
        assert_eq!(config.hooks.mode, HookMode::ExportTable);
        assert_eq!(config.logging.filter, "pawnbridge_engine=debug");

        let offsets = &config.invoke.array_length_offsets;
        assert_eq!(offsets.offset("CreateDynamicObjectEx", 0), 5);
        assert_eq!(offsets.offset("CreateDynamicPolygonEx", 1), 4);
        assert_eq!(offsets.offset("SetPlayerPos", 0), 1);

        assert_eq!(config.database.driver, DatabaseDriver::Sqlite);
        assert_eq!(config.database.retry_interval(), Duration::from_secs(1));
        assert_eq!(config.database.ping_interval_ms, 5000);
        assert_eq!(config.files, FilesConfig::default());
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        let result = BridgeConfig::from_str("[hooks]\nmode = \"trampoline\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
