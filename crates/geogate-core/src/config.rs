//! Application configuration management.
//!
//! Handles loading, saving, and validating geogate configuration:
//! - Door server base URL and request timeout
//! - Data directory for persisted settings
//! - Local agent bind address
//! - Location permissions granted by the platform bridge
//!
//! Configuration is layered: an optional TOML file, then environment
//! variables prefixed with `GEOGATE` (`GEOGATE_API__BASE_URL=...`). The door
//! coordinate, geofence radius and rate-limit window are compile-time
//! constants and cannot be configured.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::POLL_INTERVAL_MS;
use crate::location::PermissionStatus;

/// Environment variable holding an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "GEOGATE_CONFIG";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GEOGATE";

/// Shortest poll interval accepted from configuration.
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The layered sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// The config file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A single field failed validation.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeogateConfig {
    /// Door server connection.
    pub api: ApiConfig,

    /// Persisted settings location.
    pub storage: StorageConfig,

    /// Local agent HTTP listener.
    pub server: ServerConfig,

    /// Location permissions granted to this installation.
    pub location: LocationConfig,

    /// Foreground polling tuning.
    pub geofence: GeofenceConfig,
}

/// Door server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL the `/esp32/door/...` paths are appended to.
    pub base_url: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            request_timeout_secs: 15,
        }
    }
}

/// Persisted settings location.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `settings.json`. Platform default when unset.
    pub data_dir: Option<PathBuf>,
}

/// Local agent HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: String,

    /// Port to bind.
    pub port: u16,

    /// Use production logging (JSON files plus compact stdout).
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8731,
            production: false,
        }
    }
}

/// Location permissions as reported by the platform bridge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocationConfig {
    /// Foreground ("while in use") permission.
    pub foreground_permission: PermissionStatus,

    /// Background ("always") permission.
    pub background_permission: PermissionStatus,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            foreground_permission: PermissionStatus::Undetermined,
            background_permission: PermissionStatus::Undetermined,
        }
    }
}

/// Foreground polling tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeofenceConfig {
    /// Interval between foreground poll ticks.
    pub poll_interval_ms: u64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

impl GeogateConfig {
    /// Load configuration from the default location plus environment.
    ///
    /// The file is optional; a missing file yields defaults overridden by
    /// `GEOGATE_*` variables. When `GEOGATE_CONFIG` is set, that file must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Path::new(&path)),
            None => {
                let path = Self::config_path();
                Self::build(path.as_deref(), false)
            }
        }
    }

    /// Load configuration from an explicit file plus environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `path` does not exist, or an error
    /// if parsing or validation fails.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::build(Some(path), true)
    }

    fn build(path: Option<&Path>, required: bool) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let write_err = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single failing field, or
    /// [`ConfigError::MultipleValidationErrors`] when several fail.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.api.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(invalid(
                "api.base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(invalid("api.base_url", e.to_string())),
        }

        if self.api.request_timeout_secs == 0 {
            errors.push(invalid("api.request_timeout_secs", "must be greater than 0"));
        }

        if self.server.port == 0 {
            errors.push(invalid("server.port", "must be greater than 0"));
        }

        if self.server.bind_address.trim().is_empty() {
            errors.push(invalid("server.bind_address", "must not be empty"));
        }

        if self.geofence.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            errors.push(invalid(
                "geofence.poll_interval_ms",
                format!("must be at least {MIN_POLL_INTERVAL_MS}"),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Directory for persisted settings.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the platform
    /// default cannot be determined.
    pub fn data_dir(&self) -> crate::error::Result<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::storage::default_data_dir(),
        }
    }

    /// Default configuration file path.
    ///
    /// On Linux: `/etc/geogate/config.toml`
    /// Elsewhere: the platform config dir.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            Some(PathBuf::from("/etc/geogate/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "geogate")
                .map(|dirs| dirs.config_dir().join("config.toml"))
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = GeogateConfig::default();
        config.validate().unwrap();
        assert_eq!(config.geofence.poll_interval_ms, 30_000);
        assert_eq!(config.api.request_timeout_secs, 15);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = GeogateConfig::load_from(Path::new("/nonexistent/geogate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = GeogateConfig::default();
        config.api.base_url = "https://door.example.com/api".to_string();
        config.storage.data_dir = Some(dir.path().join("data"));
        config.location.foreground_permission = PermissionStatus::Granted;
        config.save_to(&path).unwrap();

        let loaded = GeogateConfig::load_from(&path).unwrap();
        assert_eq!(loaded.api.base_url, "https://door.example.com/api");
        assert_eq!(loaded.storage.data_dir, Some(dir.path().join("data")));
        assert_eq!(
            loaded.location.foreground_permission,
            PermissionStatus::Granted
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 9000\n").unwrap();

        let loaded = GeogateConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.server.bind_address, "127.0.0.1");
        assert_eq!(loaded.api, ApiConfig::default());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = GeogateConfig::default();
        config.api.base_url = "ftp://door.example.com".to_string();
        config.api.request_timeout_secs = 0;
        config.geofence.poll_interval_ms = 10;

        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = GeogateConfig::default();
        config.api.base_url = "not a url".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "api.base_url"));
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let mut config = GeogateConfig::default();
        config.storage.data_dir = Some(PathBuf::from("/tmp/geogate-test"));
        assert_eq!(
            config.data_dir().unwrap(),
            PathBuf::from("/tmp/geogate-test")
        );
    }
}
