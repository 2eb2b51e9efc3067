//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use groendus_core::ClientOptions;
use groendus_core::auth::DEFAULT_IDENTITY_URL;
use groendus_core::client::DEFAULT_GRAPHQL_URL;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Portal account.
    pub account: AccountConfig,
    /// The chargepoint to track.
    pub device: DeviceConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Portal endpoints and transport settings.
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// The password is not checked here since it may come from the
    /// environment at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.account.validate());
        errors.extend(self.device.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.api.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Portal account credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AccountConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let email = self.email.trim();

        if email.is_empty() {
            errors.push(ValidationError::new("account.email", "email cannot be empty"));
        } else if !email.contains('@') {
            errors.push(ValidationError::new(
                "account.email",
                format!("'{}' is not an email address", self.email),
            ));
        }

        if let Some(password) = &self.password
            && password.is_empty()
        {
            errors.push(ValidationError::new(
                "account.password",
                "password cannot be empty string (omit it to use GROENDUS_PASSWORD)",
            ));
        }

        errors
    }
}

/// Minimum poll interval in seconds (1 minute).
pub const MIN_POLL_INTERVAL: u64 = 60;
/// Maximum poll interval in seconds (1 day).
pub const MAX_POLL_INTERVAL: u64 = 86_400;
/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL: u64 = 300;
/// Default number of transaction pages scanned per pass.
pub const DEFAULT_MAX_PAGES: u32 = 5;
/// Upper bound for `device.max_pages`.
pub const MAX_MAX_PAGES: u32 = 100;

/// The chargepoint whose energy is accumulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Chargepoint id as shown in the portal.
    pub chargepoint_id: String,
    /// Persistence key; defaults to the chargepoint id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    /// Poll interval in seconds.
    pub poll_interval: u64,
    /// Pages of 50 transactions scanned per pass at most.
    pub max_pages: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            chargepoint_id: String::new(),
            entry_id: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl DeviceConfig {
    /// The key under which this device's accumulator is stored.
    pub fn entry_id(&self) -> &str {
        self.entry_id.as_deref().unwrap_or(&self.chargepoint_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.chargepoint_id.trim().is_empty() {
            errors.push(ValidationError::new(
                "device.chargepoint_id",
                "chargepoint id cannot be empty",
            ));
        }

        if let Some(entry_id) = &self.entry_id
            && entry_id.trim().is_empty()
        {
            errors.push(ValidationError::new(
                "device.entry_id",
                "entry id cannot be empty string (omit it to use the chargepoint id)",
            ));
        }

        if self.poll_interval < MIN_POLL_INTERVAL {
            errors.push(ValidationError::new(
                "device.poll_interval",
                format!(
                    "poll interval {} is too short (minimum {} seconds)",
                    self.poll_interval, MIN_POLL_INTERVAL
                ),
            ));
        } else if self.poll_interval > MAX_POLL_INTERVAL {
            errors.push(ValidationError::new(
                "device.poll_interval",
                format!(
                    "poll interval {} is too long (maximum {} seconds / 1 day)",
                    self.poll_interval, MAX_POLL_INTERVAL
                ),
            ));
        }

        if !(1..=MAX_MAX_PAGES).contains(&self.max_pages) {
            errors.push(ValidationError::new(
                "device.max_pages",
                format!("max pages {} must be between 1 and {}", self.max_pages, MAX_MAX_PAGES),
            ));
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: groendus_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }
}

/// Maximum per-request timeout in seconds.
pub const MAX_REQUEST_TIMEOUT: u64 = 300;

/// Portal endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub graphql_url: String,
    pub identity_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
            request_timeout: 30,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Transport settings for the GraphQL client.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            graphql_url: self.graphql_url.clone(),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, url) in [
            ("api.graphql_url", &self.graphql_url),
            ("api.identity_url", &self.identity_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                errors.push(ValidationError::new(
                    field,
                    format!("'{}' is not an http(s) URL", url),
                ));
            }
        }

        if !(1..=MAX_REQUEST_TIMEOUT).contains(&self.request_timeout) {
            errors.push(ValidationError::new(
                "api.request_timeout",
                format!(
                    "request timeout {} must be between 1 and {} seconds",
                    self.request_timeout, MAX_REQUEST_TIMEOUT
                ),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `device.poll_interval`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("groendus")
        .join("service.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            account: AccountConfig {
                email: "driver@example.com".to_string(),
                password: Some("secret".to_string()),
            },
            device: DeviceConfig {
                chargepoint_id: "NL-GRO-0001".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn fields(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.device.poll_interval, 300);
        assert_eq!(config.device.max_pages, 5);
        assert_eq!(config.api.request_timeout, 30);
        assert_eq!(config.api.graphql_url, DEFAULT_GRAPHQL_URL);
        assert_eq!(config.storage.path, groendus_store::default_db_path());
    }

    #[test]
    fn test_default_config_needs_account_and_device() {
        let fields = fields(Config::default().validate().unwrap_err());
        assert!(fields.contains(&"account.email".to_string()));
        assert!(fields.contains(&"device.chargepoint_id".to_string()));
    }

    #[test]
    fn test_valid_config() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_entry_id_defaults_to_chargepoint() {
        let mut device = valid_config().device;
        assert_eq!(device.entry_id(), "NL-GRO-0001");
        device.entry_id = Some("garage".to_string());
        assert_eq!(device.entry_id(), "garage");
    }

    #[test]
    fn test_range_validation_accumulates() {
        let mut config = valid_config();
        config.device.poll_interval = 59;
        config.device.max_pages = 0;
        config.api.request_timeout = 301;
        config.api.identity_url = "ftp://example.com".to_string();

        let fields = fields(config.validate().unwrap_err());
        assert_eq!(
            fields,
            vec![
                "device.poll_interval",
                "device.max_pages",
                "api.identity_url",
                "api.request_timeout",
            ]
        );
    }

    #[test]
    fn test_poll_interval_bounds_inclusive() {
        let mut config = valid_config();
        config.device.poll_interval = MIN_POLL_INTERVAL;
        config.validate().unwrap();
        config.device.poll_interval = MAX_POLL_INTERVAL;
        config.validate().unwrap();
        config.device.poll_interval = MAX_POLL_INTERVAL + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [account]
            email = "driver@example.com"

            [device]
            chargepoint_id = "NL-GRO-0001"
            max_pages = 2
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.account.password, None);
        assert_eq!(config.device.max_pages, 2);
        assert_eq!(config.device.poll_interval, 300);
        config.validate().unwrap();
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", valid_config().account);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("service.toml");

        let mut config = valid_config();
        config.device.entry_id = Some("garage".to_string());
        config.storage.path = PathBuf::from("/tmp/groendus-test.db");
        config.save(&config_path).unwrap();

        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded.account.email, "driver@example.com");
        assert_eq!(loaded.device.entry_id(), "garage");
        assert_eq!(loaded.storage.path, PathBuf::from("/tmp/groendus-test.db"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/groendus/service.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
