//! Configuration system for Roster.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ROSTER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/roster/config.toml
//!   3. ~/.config/roster/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::peer::DEFAULT_SERVICE_PORT;
use crate::wire::{
    ANNOUNCE_INTERVAL_SECS, DEFAULT_GROUP, DEFAULT_GROUP_PORT, MAX_DATAGRAM_SIZE,
    PROBE_INTERVAL_SECS,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub queues: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface whose addresses seed the registry. Empty = all interfaces.
    pub interface: String,
    /// Port advertised for local entries and probed on peers.
    pub service_port: u16,
    /// Multicast group snapshots are received on.
    pub group: IpAddr,
    /// UDP port of the multicast group.
    pub group_port: u16,
    /// Where announcements are sent. Unset = the listen group.
    pub announce_addr: Option<SocketAddr>,
    /// Receive buffer per datagram.
    pub max_datagram_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub announce_interval_secs: u64,
    pub probe_interval_secs: u64,
    /// Upper bound on a single connect attempt.
    pub probe_timeout_ms: u64,
    /// Probes in flight per tick.
    pub probe_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Snapshots buffered between listener and prober. Listener blocks when full.
    pub inbound_capacity: usize,
    /// Errors buffered for the operator. Excess errors are dropped.
    pub error_capacity: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            service_port: DEFAULT_SERVICE_PORT,
            group: DEFAULT_GROUP
                .parse()
                .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::new(224, 0, 0, 1))),
            group_port: DEFAULT_GROUP_PORT,
            announce_addr: None,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            announce_interval_secs: ANNOUNCE_INTERVAL_SECS,
            probe_interval_secs: PROBE_INTERVAL_SECS,
            probe_timeout_ms: 1000,
            probe_concurrency: 16,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1,
            error_capacity: 64,
        }
    }
}

impl NetworkConfig {
    /// Destination for announcements.
    pub fn announce_target(&self) -> SocketAddr {
        self.announce_addr
            .unwrap_or_else(|| SocketAddr::new(self.group, self.group_port))
    }

    /// True when announcements go to the group we listen on.
    pub fn is_symmetric(&self) -> bool {
        self.announce_target() == SocketAddr::new(self.group, self.group_port)
    }
}

impl TimingConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("roster")
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

impl RosterConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse `path`, or defaults when it does not exist. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(RosterConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ROSTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        Self::write_default_to(&Self::file_path())
    }

    /// Write default config to `path` unless a file is already there.
    pub fn write_default_to(path: &Path) -> Result<PathBuf, ConfigError> {
        let owned = path.to_path_buf();
        if path.exists() {
            return Ok(owned);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFailed(owned.clone(), e))?;
        }
        let text =
            toml::to_string_pretty(&RosterConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(owned.clone(), e))?;
        Ok(owned)
    }

    /// Apply ROSTER_* overrides. `lookup` maps a variable name to its value.
    /// Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROSTER_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Some(v) = lookup("ROSTER_NETWORK__GROUP") {
            if let Ok(ip) = v.parse() {
                self.network.group = ip;
            }
        }
        if let Some(v) = lookup("ROSTER_NETWORK__GROUP_PORT") {
            if let Ok(p) = v.parse() {
                self.network.group_port = p;
            }
        }
        if let Some(v) = lookup("ROSTER_NETWORK__ANNOUNCE_ADDR") {
            if v.is_empty() {
                self.network.announce_addr = None;
            } else if let Ok(addr) = v.parse() {
                self.network.announce_addr = Some(addr);
            }
        }
        if let Some(v) = lookup("ROSTER_TIMING__PROBE_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.timing.probe_timeout_ms = ms;
            }
        }
    }
}
