//! Configuration and credential persistence
//!
//! Files live in platform-appropriate locations:
//! - Linux: ~/.config/fbx/
//! - macOS: ~/Library/Application Support/fbx/
//! - Windows: %APPDATA%\fbx\
//!
//! `config.toml` holds the endpoint, app identity, and pairing policy.
//! `credentials.toml` holds the pairing secret and is written the moment
//! the box hands it out.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    NoDirFound,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device to talk to
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// How this application introduces itself during pairing
    #[serde(default)]
    pub app: AppIdentity,

    /// Pairing-approval polling policy
    #[serde(default)]
    pub pairing: PairingConfig,
}

/// Host and port of the box, before discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Static application identity, sent once at pairing time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppIdentity {
    #[serde(default = "default_app_id")]
    pub app_id: String,

    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default = "default_app_version")]
    pub app_version: String,

    #[serde(default = "default_device_name")]
    pub device_name: String,
}

/// Backoff policy for polling pairing approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// First delay between approval polls, in milliseconds
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_delay_ms: u64,

    /// Delay cap; the delay doubles until it reaches this
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_delay_ms: u64,

    /// Give up (terminal failure) after this many polls
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
}

// Default value functions
fn default_host() -> String {
    crate::DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    crate::DEFAULT_PORT
}
fn default_app_id() -> String {
    "fbx-core".to_string()
}
fn default_app_name() -> String {
    "fbx Freebox client".to_string()
}
fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_device_name() -> String {
    "fbx host".to_string()
}
fn default_poll_initial_ms() -> u64 {
    1000
}
fn default_poll_max_ms() -> u64 {
    10_000
}
fn default_poll_max_attempts() -> u32 {
    60
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            app_name: default_app_name(),
            app_version: default_app_version(),
            device_name: default_device_name(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            poll_initial_delay_ms: default_poll_initial_ms(),
            poll_max_delay_ms: default_poll_max_ms(),
            poll_max_attempts: default_poll_max_attempts(),
        }
    }
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join("fbx"))
            .ok_or(ConfigError::NoDirFound)
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}

/// Long-lived pairing secret issued by the box
///
/// The track_id identifies the pairing request; the app_token is the
/// HMAC key for every later session password. Neither is ever logged.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub app_token: String,
    pub track_id: u64,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_token", &"<redacted>")
            .field("track_id", &"<redacted>")
            .finish()
    }
}

/// File-backed store for [`Credentials`]
///
/// The path is injectable so tests never touch the real config dir.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at the default location (`<config dir>/fbx/credentials.toml`)
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            path: Config::config_dir()?.join("credentials.toml"),
        })
    }

    /// Store at a specific path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load persisted credentials, `None` when the app was never paired
    pub fn load(&self) -> Result<Option<Credentials>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let credentials: Credentials = toml::from_str(&content)?;
        Ok(Some(credentials))
    }

    /// Persist credentials, creating the parent directory if needed
    pub fn save(&self, credentials: &Credentials) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(credentials)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Forget persisted credentials (forces a fresh pairing next time)
    pub fn clear(&self) -> Result<(), ConfigError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
