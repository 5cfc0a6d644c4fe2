//! Configuration system for Rialto.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RIALTO_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rialto/config.toml
//!   3. ~/.config/rialto/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::envelope::NodeAddress;

/// Top-level configuration for the P2P core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Seed-node addresses ("host:port") tried for the preliminary
    /// data request, in shuffled order.
    pub seed_nodes: Vec<String>,
    /// Keep-alive ping interval.
    pub keep_alive_interval_secs: u64,
    /// How long to wait for a data response before trying the next seed.
    pub request_retry_delay_secs: u64,
    /// Default timeout for direct sends when the caller passes none.
    pub send_timeout_secs: u64,
    /// Per-peer outbound broadcast queue depth.
    pub broadcast_queue_depth: usize,
    /// Bounded wait for broadcast queues to drain at shutdown.
    pub shutdown_drain_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// TTL pruning sweep interval.
    pub prune_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            seed_nodes: Vec::new(),
            keep_alive_interval_secs: 30,
            request_retry_delay_secs: 10,
            send_timeout_secs: 90,
            broadcast_queue_depth: 256,
            shutdown_drain_ms: 2_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: 300,
        }
    }
}

impl NetworkConfig {
    /// Parsed seed-node addresses; malformed entries are skipped with
    /// a warning.
    pub fn seed_addresses(&self) -> Vec<NodeAddress> {
        self.seed_nodes
            .iter()
            .filter_map(|s| {
                let parsed = NodeAddress::parse(s);
                if parsed.is_none() {
                    tracing::warn!(entry = %s, "ignoring malformed seed node address");
                }
                parsed
            })
            .collect()
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn request_retry_delay(&self) -> Duration {
        Duration::from_secs(self.request_retry_delay_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }
}

impl StorageConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("rialto")
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

impl P2pConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            P2pConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RIALTO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&P2pConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply RIALTO_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RIALTO_NETWORK__SEED_NODES") {
            self.network.seed_nodes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("RIALTO_NETWORK__KEEP_ALIVE_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.network.keep_alive_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("RIALTO_NETWORK__REQUEST_RETRY_DELAY_SECS") {
            if let Ok(n) = v.parse() {
                self.network.request_retry_delay_secs = n;
            }
        }
        if let Ok(v) = std::env::var("RIALTO_NETWORK__SEND_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.network.send_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("RIALTO_STORAGE__PRUNE_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.storage.prune_interval_secs = n;
            }
        }
    }
}
