//! Cluster configuration for one replica.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use viewstamp_types::{MAX_REPLICAS, NodeId, quorum_size};

use crate::error::ConfigError;
use crate::message::{DEFAULT_MAX_MESSAGE_SIZE, ENTRY_HEADER_SIZE};

/// Timing knobs for the submission path and the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Default bound on how long `submit` waits for a quorum.
    pub quorum_timeout: Duration,

    /// Longest idle sleep between polls for acks or entries.
    pub poll_interval: Duration,

    /// How long the leader waits for a peer's ack before resending an
    /// uncommitted entry to it.
    pub retransmit_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            quorum_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(2),
            retransmit_interval: Duration::from_millis(50),
        }
    }
}

/// Static membership and limits for one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    node_id: NodeId,
    group_size: usize,
    pub timeouts: TimeoutConfig,
    pub max_message_size: usize,
}

impl ClusterConfig {
    pub fn new(node_id: NodeId, group_size: usize) -> Result<Self, ConfigError> {
        let config = Self {
            node_id,
            group_size,
            timeouts: TimeoutConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        };
        config.validate()?;
        Ok(config)
    }

    /// A group of one: node 0 is its own quorum.
    pub fn single_node() -> Self {
        Self {
            node_id: NodeId::new(0),
            group_size: 1,
            timeouts: TimeoutConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_size == 0 {
            return Err(ConfigError::EmptyGroup);
        }
        if self.group_size > MAX_REPLICAS {
            return Err(ConfigError::GroupTooLarge {
                group_size: self.group_size,
                max: MAX_REPLICAS,
            });
        }
        if self.node_id.as_usize() >= self.group_size {
            return Err(ConfigError::NodeOutOfRange {
                node: self.node_id,
                group_size: self.group_size,
            });
        }
        if self.max_message_size <= ENTRY_HEADER_SIZE {
            return Err(ConfigError::MessageSizeTooSmall {
                size: self.max_message_size,
                header: ENTRY_HEADER_SIZE,
            });
        }
        if self.timeouts.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.group_size)
    }

    pub fn is_single_node(&self) -> bool {
        self.group_size == 1
    }

    /// Every other node in the group, ascending.
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.group_size as u8)
            .map(NodeId::new)
            .filter(move |id| *id != self.node_id)
    }

    /// Returns true if `node` belongs to the group.
    pub fn contains(&self, node: NodeId) -> bool {
        node.as_usize() < self.group_size
    }
}
