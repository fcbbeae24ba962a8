//! Configuration system for Parley.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PARLEY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/parley/config.toml
//!   3. ~/.config/parley/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub pools: PoolConfig,
    pub limits: LimitsConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name this server introduces itself with.
    pub name: String,
    pub description: String,
    /// Globally assigned server numeric.
    pub numeric: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the client listener binds to.
    pub listen_addr: SocketAddr,
    /// Seconds an unregistered connection may idle before it is dropped.
    pub registration_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Peer and connection objects created eagerly at start-up.
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Minimum seconds between nick changes.
    pub nick_delay_secs: i64,
    /// Seconds for one new message target to become available.
    pub target_delay_secs: i64,
    /// Message targets a fresh connection starts with.
    pub start_targets: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Disconnect records kept for whowas lookups. 0 = keep none.
    pub capacity: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            network: NetworkConfig::default(),
            pools: PoolConfig::default(),
            limits: LimitsConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "parley.local".to_string(),
            description: "Parley chat server".to_string(),
            numeric: 1,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6667)),
            registration_timeout_secs: 60,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            nick_delay_secs: 30,
            target_delay_secs: 120,
            start_targets: 10,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 800 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("parley")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ParleyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, still applying env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            ParleyConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PARLEY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&ParleyConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply PARLEY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `PARLEY_<SECTION>__<KEY>` overrides from `var`. Values that do
    /// not parse are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PARLEY_SERVER__NAME") {
            self.server.name = v;
        }
        if let Some(v) = var("PARLEY_SERVER__DESCRIPTION") {
            self.server.description = v;
        }
        if let Some(v) = var("PARLEY_SERVER__NUMERIC") {
            if let Ok(n) = v.parse() {
                self.server.numeric = n;
            }
        }
        if let Some(v) = var("PARLEY_NETWORK__LISTEN_ADDR") {
            if let Ok(addr) = v.parse() {
                self.network.listen_addr = addr;
            }
        }
        if let Some(v) = var("PARLEY_NETWORK__REGISTRATION_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.network.registration_timeout_secs = secs;
            }
        }
        if let Some(v) = var("PARLEY_POOLS__MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.pools.max_connections = n;
            }
        }
        if let Some(v) = var("PARLEY_LIMITS__NICK_DELAY_SECS") {
            if let Ok(secs) = v.parse() {
                self.limits.nick_delay_secs = secs;
            }
        }
        if let Some(v) = var("PARLEY_LIMITS__TARGET_DELAY_SECS") {
            if let Ok(secs) = v.parse() {
                self.limits.target_delay_secs = secs;
            }
        }
        if let Some(v) = var("PARLEY_LIMITS__START_TARGETS") {
            if let Ok(n) = v.parse() {
                self.limits.start_targets = n;
            }
        }
        if let Some(v) = var("PARLEY_HISTORY__CAPACITY") {
            if let Ok(n) = v.parse() {
                self.history.capacity = n;
            }
        }
    }
}
