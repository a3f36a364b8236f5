//! Configuration management for the tether CLI
//!
//! Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Linux: `~/.config/tether/tether.toml`
//! - macOS: `~/Library/Application Support/tether/tether.toml`
//! - Windows: `%APPDATA%\tether\config\tether.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tether_core::ChannelConfig;
use tether_transport::FramingKind;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// CLI configuration
///
/// # Example TOML
///
/// ```toml
/// [companion]
/// command = "tether-companion"
/// args = ["--stdio"]
/// framing = "length-native"  # "length-native" | "length-big-endian" | "passthrough"
///
/// [timeouts]
/// short_ms = 2000
/// default_ms = 15000
/// long_ms = 120000
///
/// [storage]
/// # path = ""  # Empty = default location
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Companion process
    #[serde(default)]
    pub companion: CompanionConfig,

    /// Request timeout budgets
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Pairing and identity storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How to launch the companion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionConfig {
    /// Executable to spawn
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Message delimiting on the companion's stdio
    #[serde(default)]
    pub framing: FramingKind,
}

fn default_command() -> String {
    "tether-companion".to_string()
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            framing: FramingKind::default(),
        }
    }
}

/// Timeout budgets in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_short_ms")]
    pub short_ms: u64,

    #[serde(default = "default_default_ms")]
    pub default_ms: u64,

    #[serde(default = "default_long_ms")]
    pub long_ms: u64,
}

fn default_short_ms() -> u64 {
    2_000
}

fn default_default_ms() -> u64 {
    15_000
}

fn default_long_ms() -> u64 {
    120_000
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            short_ms: default_short_ms(),
            default_ms: default_default_ms(),
            long_ms: default_long_ms(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State file path (empty = default location)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "tether")
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    /// Platform-specific configuration file path
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("tether.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Where pairing and identity state lives.
    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage
            .path
            .clone()
            .or_else(|| Self::data_dir().map(|dir| dir.join("state.json")))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create default configuration file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        if let Some(path) = Self::default_path() {
            if !path.exists() {
                Self::default().save(&path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.companion.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "companion.command must not be empty".to_string(),
            ));
        }

        let timeouts = [
            ("short_ms", self.timeouts.short_ms),
            ("default_ms", self.timeouts.default_ms),
            ("long_ms", self.timeouts.long_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "timeouts.{name} must be greater than 0"
                )));
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }

    /// Channel budgets from the `[timeouts]` section.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            short_timeout: Duration::from_millis(self.timeouts.short_ms),
            long_timeout: Duration::from_millis(self.timeouts.long_ms),
            default_timeout: Duration::from_millis(self.timeouts.default_ms),
            ..ChannelConfig::default()
        }
    }
}

/// CLI configuration overrides
///
/// Command-line arguments take precedence over config file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Companion executable override
    pub command: Option<String>,
    /// Storage path override
    pub storage: Option<PathBuf>,
    /// Verbose flag override
    pub verbose: Option<bool>,
    /// Debug flag override
    pub debug: Option<bool>,
}

impl Config {
    /// Apply CLI overrides to configuration
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref command) = overrides.command {
            self.companion.command = command.clone();
        }
        if let Some(ref path) = overrides.storage {
            self.storage.path = Some(path.clone());
        }
        if overrides.verbose == Some(true) {
            self.logging.level = "info".to_string();
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Test default configuration values
    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.companion.command, "tether-companion");
        assert!(config.companion.args.is_empty());
        assert_eq!(config.companion.framing, FramingKind::LengthNative);

        assert_eq!(config.timeouts.short_ms, 2_000);
        assert_eq!(config.timeouts.default_ms, 15_000);
        assert_eq!(config.timeouts.long_ms, 120_000);

        assert!(config.storage.path.is_none());
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = Config::default();
        config.companion.command = "  ".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("companion.command"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.timeouts.long_ms = 0;

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("timeouts.long_ms"));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [companion]
            command = "/opt/tether/companion"
            framing = "length-big-endian"

            [timeouts]
            short_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.companion.command, "/opt/tether/companion");
        assert_eq!(config.companion.framing, FramingKind::LengthBigEndian);
        assert_eq!(config.timeouts.short_ms, 500);
        assert_eq!(config.timeouts.long_ms, 120_000);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tether.toml");

        let mut config = Config::default();
        config.companion.args = vec!["--stdio".to_string()];
        config.storage.path = Some(dir.path().join("state.json"));
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[timeouts]\nshort_ms = 0\n").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = CliOverrides {
            command: Some("./companion".to_string()),
            storage: Some(PathBuf::from("/tmp/state.json")),
            verbose: Some(true),
            debug: Some(true),
        };
        let config = Config::default().with_overrides(&overrides);

        assert_eq!(config.companion.command, "./companion");
        assert_eq!(config.storage_path(), Some(PathBuf::from("/tmp/state.json")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_channel_config_uses_timeouts() {
        let mut config = Config::default();
        config.timeouts.short_ms = 250;

        let channel = config.channel_config();
        assert_eq!(channel.short_timeout, Duration::from_millis(250));
        assert_eq!(channel.default_timeout, Duration::from_secs(15));
        assert_eq!(channel.long_timeout, Duration::from_secs(120));
    }
}
