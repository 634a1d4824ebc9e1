//! Heartbeater Configuration
//!
//! This module provides configuration structures for the multicast
//! heartbeat election daemon.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::ops::Range;
use std::time::Duration;

use crate::state::Role;

/// Main Heartbeater configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeaterConfig {
    /// Node identity
    #[serde(default)]
    pub node: NodeConfig,

    /// Multicast group and heartbeat transmission
    pub multicast: MulticastConfig,

    /// Failure detection and conflict handling
    #[serde(default)]
    pub election: ElectionConfig,

    /// Commands run on role transitions
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Identity of this software instance (generated when absent)
    #[serde(default)]
    pub software_id: Option<String>,
}

/// Multicast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MulticastConfig {
    /// Multicast group address
    pub group: Ipv4Addr,

    /// UDP port heartbeats are sent to and received on
    pub port: u16,

    /// Local interface address used to join the group and stamp heartbeats
    #[serde(default = "default_interface")]
    pub interface: Ipv4Addr,

    /// Multicast TTL for outgoing heartbeats
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Interval between heartbeats in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

/// Role a node takes on at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InitialRole {
    #[default]
    Slave,
    Electing,
}

impl From<InitialRole> for Role {
    fn from(role: InitialRole) -> Self {
        match role {
            InitialRole::Slave => Role::Slave,
            InitialRole::Electing => Role::Electing,
        }
    }
}

/// Election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Silence window after which a node assumes there is no master
    #[serde(default = "default_failure_detection_timeout_ms")]
    pub failure_detection_timeout_ms: u64,

    /// Lower bound of the master conflict backoff (inclusive)
    #[serde(default)]
    pub conflict_backoff_min_ms: u64,

    /// Upper bound of the master conflict backoff (exclusive)
    #[serde(default = "default_conflict_backoff_max_ms")]
    pub conflict_backoff_max_ms: u64,

    /// Role at startup
    #[serde(default)]
    pub initial_role: InitialRole,

    /// Seed for the backoff RNG (random when absent)
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Hook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Command run after this node becomes MASTER
    #[serde(default)]
    pub on_become_master: Option<String>,

    /// Command run when this node starts an election
    #[serde(default)]
    pub on_start_electing: Option<String>,

    /// Maximum run time of a hook command in milliseconds
    #[serde(default = "default_hook_timeout_ms")]
    pub timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_ttl() -> u32 {
    1
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_failure_detection_timeout_ms() -> u64 {
    5000
}

fn default_conflict_backoff_max_ms() -> u64 {
    1000
}

fn default_hook_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            failure_detection_timeout_ms: default_failure_detection_timeout_ms(),
            conflict_backoff_min_ms: 0,
            conflict_backoff_max_ms: default_conflict_backoff_max_ms(),
            initial_role: InitialRole::default(),
            seed: None,
        }
    }
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            on_become_master: None,
            on_start_electing: None,
            timeout_ms: default_hook_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl HeartbeaterConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: HeartbeaterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration back to TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(id) = &self.node.software_id {
            if id.trim().is_empty() {
                return Err(crate::Error::Config("node.software_id cannot be empty".into()));
            }
        }

        if !self.multicast.group.is_multicast() {
            return Err(crate::Error::Config(format!(
                "multicast.group {} is not a multicast address",
                self.multicast.group
            )));
        }

        if self.multicast.port == 0 {
            return Err(crate::Error::Config("multicast.port cannot be 0".into()));
        }

        if self.election.failure_detection_timeout_ms < 2 {
            return Err(crate::Error::Config(
                "election.failure_detection_timeout_ms must be at least 2".into(),
            ));
        }

        if self.election.conflict_backoff_min_ms >= self.election.conflict_backoff_max_ms {
            return Err(crate::Error::Config(format!(
                "election.conflict_backoff_min_ms ({}) must be below conflict_backoff_max_ms ({})",
                self.election.conflict_backoff_min_ms, self.election.conflict_backoff_max_ms
            )));
        }

        let poll_ms = self.election.failure_detection_timeout_ms / 2;
        if self.multicast.heartbeat_interval_ms == 0 || self.multicast.heartbeat_interval_ms >= poll_ms {
            return Err(crate::Error::Config(format!(
                "multicast.heartbeat_interval_ms ({}) must be non-zero and below the {} ms poll window",
                self.multicast.heartbeat_interval_ms, poll_ms
            )));
        }

        Ok(())
    }

    /// Get the configured software ID, or a freshly generated one
    pub fn software_id(&self) -> String {
        self.node
            .software_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Get the multicast destination as a socket address
    pub fn multicast_address(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.multicast.group, self.multicast.port)
    }

    /// Get failure detection timeout as Duration
    pub fn failure_detection_timeout(&self) -> Duration {
        Duration::from_millis(self.election.failure_detection_timeout_ms)
    }

    /// Receive timeout of the watcher: half the failure detection window
    pub fn poll_timeout(&self) -> Duration {
        self.failure_detection_timeout() / 2
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.multicast.heartbeat_interval_ms)
    }

    /// Master conflict backoff range (upper bound exclusive)
    pub fn backoff_range(&self) -> Range<Duration> {
        Duration::from_millis(self.election.conflict_backoff_min_ms)
            ..Duration::from_millis(self.election.conflict_backoff_max_ms)
    }

    /// Get hook timeout as Duration
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hooks.timeout_ms)
    }
}
