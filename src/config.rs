use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::authorizer::ReturnMethod;
use crate::error::{GctlError, Result};
use crate::oauth::DEFAULT_SCOPES;

/// Keys accepted by `gctl config set`
pub const SETTABLE_KEYS: &[&str] = &[
    "credentials_file",
    "cache_file",
    "scopes",
    "logging.level",
    "logging.log_dir",
    "http.timeout_secs",
    "auth.return_method",
    "mail.metadata_concurrency",
];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// OAuth client secret downloaded from the Cloud console
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    /// Cached access/refresh token
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
            cache_file: default_cache_file(),
            scopes: default_scopes(),
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
            auth: AuthConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_drive_base_url")]
    pub drive_base_url: String,
    /// Root for Drive media uploads (`{root}upload/drive/v3/files/...`)
    #[serde(default = "default_drive_root_url")]
    pub drive_root_url: String,
    #[serde(default = "default_gmail_base_url")]
    pub gmail_base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            drive_base_url: default_drive_base_url(),
            drive_root_url: default_drive_root_url(),
            gmail_base_url: default_gmail_base_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// How the authorization code gets back to gctl: `loopback` or `manual`
    #[serde(default)]
    pub return_method: ReturnMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_metadata_concurrency")]
    pub metadata_concurrency: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            metadata_concurrency: default_metadata_concurrency(),
        }
    }
}

/// `$HOME/.gctl`, or `./.gctl` when no home directory is known
pub fn gctl_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gctl")
}

pub fn default_config_path() -> PathBuf {
    gctl_home().join("config.toml")
}

fn default_credentials_file() -> PathBuf {
    gctl_home().join("client_secret.json")
}

fn default_cache_file() -> PathBuf {
    gctl_home().join("credentials.json")
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_drive_base_url() -> String {
    crate::drive::DEFAULT_BASE_URL.to_string()
}

fn default_drive_root_url() -> String {
    crate::drive::DEFAULT_ROOT_URL.to_string()
}

fn default_gmail_base_url() -> String {
    crate::mail::DEFAULT_BASE_URL.to_string()
}

fn default_metadata_concurrency() -> usize {
    crate::mail::DEFAULT_METADATA_CONCURRENCY
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GctlError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GctlError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GctlError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = self.to_toml()?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GctlError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GctlError::ConfigError(format!("Failed to serialize config: {}", e)))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scopes.is_empty() || self.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(GctlError::ConfigError(
                "scopes must list at least one non-empty scope".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(GctlError::ConfigError(format!(
                "Invalid logging.level: '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.http.timeout_secs == 0 {
            return Err(GctlError::ConfigError(
                "http.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.http.timeout_secs > 600 {
            return Err(GctlError::ConfigError(
                "http.timeout_secs cannot exceed 600 (10 minutes)".to_string(),
            ));
        }

        for (key, value) in [
            ("http.drive_base_url", &self.http.drive_base_url),
            ("http.drive_root_url", &self.http.drive_root_url),
            ("http.gmail_base_url", &self.http.gmail_base_url),
        ] {
            let scheme_ok = url::Url::parse(value)
                .map(|u| u.scheme() == "https" || u.scheme() == "http")
                .unwrap_or(false);
            if !scheme_ok {
                return Err(GctlError::ConfigError(format!(
                    "{} must be an http(s) URL, got '{}'",
                    key, value
                )));
            }
        }

        // Keeps a single page of metadata fetches well under Gmail's per-user quota
        if self.mail.metadata_concurrency == 0 {
            return Err(GctlError::ConfigError(
                "mail.metadata_concurrency must be at least 1".to_string(),
            ));
        }
        if self.mail.metadata_concurrency > 50 {
            return Err(GctlError::ConfigError(
                "mail.metadata_concurrency cannot exceed 50".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Apply command-line overrides on top of the file values
    pub fn apply_overrides(
        &mut self,
        credentials_file: Option<PathBuf>,
        cache_file: Option<PathBuf>,
        level: Option<String>,
    ) {
        if let Some(path) = credentials_file {
            self.credentials_file = path;
        }
        if let Some(path) = cache_file {
            self.cache_file = path;
        }
        if let Some(level) = level {
            self.logging.level = level;
        }
    }

    /// Set one key from its string form, then re-validate
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "credentials_file" => updated.credentials_file = PathBuf::from(value),
            "cache_file" => updated.cache_file = PathBuf::from(value),
            "scopes" => {
                updated.scopes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "logging.level" => updated.logging.level = value.to_ascii_lowercase(),
            "logging.log_dir" => updated.logging.log_dir = PathBuf::from(value),
            "http.timeout_secs" => {
                updated.http.timeout_secs = value.parse().map_err(|_| {
                    GctlError::ConfigError(format!(
                        "http.timeout_secs must be a whole number of seconds, got '{}'",
                        value
                    ))
                })?;
            }
            "auth.return_method" => updated.auth.return_method = value.parse()?,
            "mail.metadata_concurrency" => {
                updated.mail.metadata_concurrency = value.parse().map_err(|_| {
                    GctlError::ConfigError(format!(
                        "mail.metadata_concurrency must be a positive integer, got '{}'",
                        value
                    ))
                })?;
            }
            other => {
                return Err(GctlError::ConfigError(format!(
                    "Unknown config key '{}'. Supported keys: {}",
                    other,
                    SETTABLE_KEYS.join(", ")
                )));
            }
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
