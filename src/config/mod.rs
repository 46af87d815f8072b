//! Configuration Management
//!
//! This module handles loading and saving manager settings and named connection profiles.
//!
//! # Configuration Locations
//! - Local: `.cdbc/config.json` (team-shareable, per-project)
//! - Global: `~/.config/cdbc/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Local config file (`.cdbc/config.json`)
//! 2. Global config file (`~/.config/cdbc/config.json`)
//!
//! Settings merge field by field; a connection profile in the local file replaces the
//! global profile of the same name entirely.
//!
//! # File Format
//! ```json
//! {
//!   "settings": { "driver_dir": "/opt/cdbc/drivers", "password_cache_ttl_secs": 120 },
//!   "connections": {
//!     "dev": { "driver": "mysql", "host": "localhost", "port": 3306, "user": "root",
//!              "password_env": "DEV_DB_PASSWORD" }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::connection::ConnectionParameters;
use crate::error::{DbcError, Result};

const DEFAULT_PASSWORD_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 600;

/// Effective `DriverManager` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory scanned for driver manifests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_dir: Option<PathBuf>,

    /// How long a successful password stays cached (0 disables the cache)
    pub password_cache_ttl_secs: u64,

    /// Connection establishment timeout (0 disables it)
    pub connect_timeout_secs: u64,

    /// Per-statement timeout (0 disables it)
    pub read_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            driver_dir: None,
            password_cache_ttl_secs: DEFAULT_PASSWORD_CACHE_TTL_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    #[must_use]
    pub const fn password_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.password_cache_ttl_secs)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Option<Duration> {
        match self.read_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Settings as written in a config file: unset fields fall through to the next layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_cache_ttl_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_secs: Option<u64>,
}

impl SettingsOverrides {
    /// Layer `other` on top of `self`
    fn merge(&mut self, other: Self) {
        if other.driver_dir.is_some() {
            self.driver_dir = other.driver_dir;
        }
        if other.password_cache_ttl_secs.is_some() {
            self.password_cache_ttl_secs = other.password_cache_ttl_secs;
        }
        if other.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
        if other.read_timeout_secs.is_some() {
            self.read_timeout_secs = other.read_timeout_secs;
        }
    }

    /// Apply these overrides to the defaults
    #[must_use]
    pub fn resolve(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            driver_dir: self.driver_dir.clone().or(defaults.driver_dir),
            password_cache_ttl_secs: self
                .password_cache_ttl_secs
                .unwrap_or(defaults.password_cache_ttl_secs),
            connect_timeout_secs: self.connect_timeout_secs.unwrap_or(defaults.connect_timeout_secs),
            read_timeout_secs: self.read_timeout_secs.unwrap_or(defaults.read_timeout_secs),
        }
    }
}

/// Stored connection profile
///
/// Connection parameters plus an optional password, given directly or through an
/// environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    #[serde(flatten)]
    pub params: ConnectionParameters,

    /// Password stored in the file (discouraged for shared local configs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name for password (if not storing password directly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl StoredConnection {
    #[must_use]
    pub fn new(params: ConnectionParameters) -> Self {
        Self { params, password: None, password_env: None }
    }

    /// The profile's password, if it has one
    ///
    /// `password_env` wins over `password`. A named variable that is not set is an error.
    pub fn resolve_password(&self) -> Result<Option<Zeroizing<String>>> {
        if let Some(env_var) = &self.password_env {
            return match std::env::var(env_var) {
                Ok(password) => Ok(Some(Zeroizing::new(password))),
                Err(_) => Err(DbcError::config_error(format!(
                    "Environment variable {env_var} not found for password"
                ))),
            };
        }
        Ok(self.password.clone().map(Zeroizing::new))
    }
}

/// Contents of one config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub settings: SettingsOverrides,

    #[serde(default)]
    pub connections: BTreeMap<String, StoredConnection>,
}

impl ConfigFile {
    /// Layer `local` on top of `global`
    #[must_use]
    pub fn merged(global: Self, local: Self) -> Self {
        let mut merged = global;
        merged.settings.merge(local.settings);
        merged.connections.extend(local.connections);
        merged
    }

    #[must_use]
    pub fn settings(&self) -> Settings {
        self.settings.resolve()
    }

    /// Look up a profile by name
    pub fn connection(&self, name: &str) -> Result<&StoredConnection> {
        self.connections.get(name).ok_or_else(|| {
            let available: Vec<_> = self.connections.keys().collect();
            DbcError::config_error(format!(
                "Connection '{name}' not found. Available connections: {available:?}"
            ))
        })
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.cdbc/config.json` (team-shareable)
    Local,
    /// Global config: `~/.config/cdbc/config.json` (per-user)
    Global,
}

/// Get path to local config file (`.cdbc/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        DbcError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".cdbc").join("config.json"))
}

/// Get path to global config file (`~/.config/cdbc/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| DbcError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("cdbc").join("config.json"))
}

/// Get path for a config location
pub fn config_path(location: ConfigLocation) -> Result<PathBuf> {
    match location {
        ConfigLocation::Local => local_config_path(),
        ConfigLocation::Global => global_config_path(),
    }
}

/// Load a config file; a missing file is an empty config
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| DbcError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str(&contents).map_err(|e| {
        DbcError::config_error(format!("Invalid config file format in {}: {e}", path.display()))
    })
}

/// Save a config file, creating its directory if needed
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            DbcError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| DbcError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| DbcError::config_error(format!("Could not write config file: {e}")))?;

    Ok(())
}

/// Load both config files with local taking precedence
pub fn load_with_precedence() -> Result<ConfigFile> {
    let global = load_config(&global_config_path()?)?;
    let local = load_config(&local_config_path()?)?;
    Ok(ConfigFile::merged(global, local))
}

/// Resolve a connection profile by name from the merged view
pub fn resolve_connection(name: &str) -> Result<StoredConnection> {
    load_with_precedence()?.connection(name).cloned()
}

/// Save a connection profile, replacing any profile with the same name
///
/// Returns the path of the file written.
pub fn save_connection(
    name: &str,
    connection: StoredConnection,
    location: ConfigLocation,
) -> Result<PathBuf> {
    if name.trim().is_empty() {
        return Err(DbcError::invalid_input("Connection name must not be empty"));
    }

    let path = config_path(location)?;
    let mut config = load_config(&path)?;
    config.connections.insert(name.to_string(), connection);
    save_config(&path, &config)?;

    tracing::debug!(name, path = %path.display(), "saved connection profile");
    Ok(path)
}

/// List all available connection profiles (merged view), sorted by name
pub fn list_connections() -> Result<Vec<(String, ConnectionParameters)>> {
    let config = load_with_precedence()?;
    Ok(config.connections.into_iter().map(|(name, stored)| (name, stored.params)).collect())
}
