//! Configuration management

use crate::error::{ErrorContext, StoreError, StoreResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_TOKEN_KEY: &str = "token";

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Remote REST API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every operation path is appended to
    pub base_url: String,
    /// User agent string
    pub user_agent: String,
    /// Request timeout in seconds; unset means the transport decides
    pub timeout_seconds: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("cybermart/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Memory,
}

/// Where the session token is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Storage file; a leading `~` expands to the home directory
    pub token_path: String,
    /// Key of the token slot
    pub token_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            token_path: "~/.cybermart/storage.json".to_string(),
            token_key: DEFAULT_TOKEN_KEY.to_string(),
        }
    }
}

impl StorageConfig {
    /// Storage file path with `~` expanded
    pub fn resolved_path(&self) -> StoreResult<PathBuf> {
        expand_home(&self.token_path)
    }
}

fn expand_home(path: &str) -> StoreResult<PathBuf> {
    let Some(rest) = path.strip_prefix('~') else {
        return Ok(PathBuf::from(path));
    };
    let home = dirs::home_dir().ok_or_else(|| StoreError::Config {
        message: format!("Cannot expand '{}': no home directory", path),
        source: None,
        context: ErrorContext::new("config")
            .with_operation("expand_home")
            .with_suggestion("Use an absolute storage.token_path"),
    })?;
    Ok(home.join(rest.trim_start_matches(['/', '\\'])))
}

/// Default location of the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cybermart").join("config.toml"))
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: ClientConfig = toml::from_str(&content).map_err(|e| StoreError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> StoreResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| StoreError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| StoreError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Apply `CYBERMART_API_URL` and `CYBERMART_TOKEN_PATH` when set
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CYBERMART_API_URL") {
            self.api.base_url = url;
        }
        if let Some(path) = lookup("CYBERMART_TOKEN_PATH") {
            self.storage.token_path = path;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> StoreResult<()> {
        let url = url::Url::parse(&self.api.base_url).map_err(|e| StoreError::Config {
            message: format!("Invalid api.base_url '{}': {}", self.api.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("validate")
                .with_suggestion("Use a full URL such as http://localhost:3000/api"),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(StoreError::Config {
                message: format!("Unsupported URL scheme: {}", url.scheme()),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.base_url to an http or https URL"),
            });
        }

        if self.storage.token_key.is_empty() {
            return Err(crate::config_error!(
                "storage.token_key must not be empty",
                "config"
            ));
        }

        if self.storage.backend == StorageBackend::File && self.storage.token_path.is_empty() {
            return Err(crate::config_error!(
                "storage.token_path must be set for the file backend",
                "config"
            ));
        }

        Ok(())
    }
}
