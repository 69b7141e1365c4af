//! Configuration management for viewstamp nodes
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the caller)
//! 2. Environment variables (VIEWSTAMP_* prefix, `__` between sections)
//! 3. viewstamp.local.toml (local overrides, not checked in)
//! 4. viewstamp.toml (project config)
//! 5. ~/.config/viewstamp/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use viewstamp_types::{MAX_REPLICAS, NodeId};
use viewstamp_vsr::{ClusterConfig, TimeoutConfig};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Configuration of one replica process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: u8,
    pub group_size: usize,
    pub data_dir: PathBuf,
    pub timeouts: TimeoutSettings,
    pub channel: ChannelSettings,
    pub store: StoreSettings,
    pub delivery: DeliverySettings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            group_size: 3,
            data_dir: PathBuf::from(".viewstamp/data"),
            timeouts: TimeoutSettings::default(),
            channel: ChannelSettings::default(),
            store: StoreSettings::default(),
            delivery: DeliverySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub quorum_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub retransmit_interval_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            quorum_timeout_ms: 5_000,
            poll_interval_ms: 2,
            retransmit_interval_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Frames buffered per direction of each peer link.
    pub ring_capacity: usize,
    pub max_message_size: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            max_message_size: viewstamp_vsr::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Committed records buffered for the application.
    pub queue_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
        }
    }
}

impl NodeConfig {
    /// Load configuration from the current directory
    pub fn load() -> anyhow::Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolve a relative data directory against `base_dir`
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        if self.data_dir.is_relative() {
            self.data_dir = base_dir.as_ref().join(&self.data_dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_size == 0 {
            return Err(ConfigError::ValidationError(
                "group_size must be at least 1".to_string(),
            ));
        }
        if self.group_size > MAX_REPLICAS {
            return Err(ConfigError::ValidationError(format!(
                "group_size {} exceeds the maximum of {MAX_REPLICAS} replicas",
                self.group_size
            )));
        }
        if usize::from(self.node_id) >= self.group_size {
            return Err(ConfigError::ValidationError(format!(
                "node_id {} must be below group_size {}",
                self.node_id, self.group_size
            )));
        }
        if self.channel.ring_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel.ring_capacity must be positive".to_string(),
            ));
        }
        if self.delivery.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "delivery.queue_capacity must be positive".to_string(),
            ));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig {
            quorum_timeout: Duration::from_millis(self.timeouts.quorum_timeout_ms),
            poll_interval: Duration::from_millis(self.timeouts.poll_interval_ms),
            retransmit_interval: Duration::from_millis(self.timeouts.retransmit_interval_ms),
        }
    }

    /// The replication core's view of this configuration.
    pub fn cluster_config(&self) -> Result<ClusterConfig, ConfigError> {
        self.validate()?;
        let config = ClusterConfig::new(NodeId::new(self.node_id), self.group_size)?
            .with_timeouts(self.timeout_config())
            .with_max_message_size(self.channel.max_message_size);
        config.validate()?;
        Ok(config)
    }

    /// This node's directory under `data_dir`
    pub fn node_data_dir(&self) -> PathBuf {
        Paths::node_data_dir(&self.data_dir, self.node_id)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
