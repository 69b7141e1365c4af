//! Error types for the replication core.
//!
//! Propagation follows the protocol's failure model:
//! - [`CodecError`] and [`ChannelError`] are local to one peer and never
//!   abort a submission; they only slow progress toward quorum.
//! - A [`StoreError`] on the leader's own record aborts that submission.
//! - [`SubmitError::NoQuorum`] reports a request that never reached a
//!   majority. A request that did reach one but is still queued behind an
//!   uncommitted predecessor is [`SubmitError::OrderedBehind`].

use std::time::Duration;

use thiserror::Error;
use viewstamp_storage::StoreError;
use viewstamp_types::{NodeId, ViewStamp};

/// Malformed or oversized wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("message of {size} bytes exceeds the maximum of {max} bytes")]
    InvalidSize { size: usize, max: usize },

    #[error("truncated message: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("{0} unexpected trailing bytes after message")]
    TrailingBytes(usize),

    #[error("bad message magic {0:#010x}")]
    BadMagic(u32),

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("node id {0} exceeds MAX_REPLICAS")]
    InvalidNode(u8),
}

/// Transport failure on one peer link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("link to {peer} is full")]
    Full { peer: NodeId },

    #[error("link to {peer} is disconnected")]
    Disconnected { peer: NodeId },

    #[error("message of {size} bytes exceeds link limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
}

/// The output collaborator could not take a committed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery queue full at {stamp}")]
    Full { stamp: ViewStamp },
}

/// Invalid replica or cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("group must contain at least one replica")]
    EmptyGroup,

    #[error("group size {group_size} exceeds MAX_REPLICAS ({max})")]
    GroupTooLarge { group_size: usize, max: usize },

    #[error("node {node} is outside a group of {group_size}")]
    NodeOutOfRange { node: NodeId, group_size: usize },

    #[error("max message size {size} cannot hold a message header of {header} bytes")]
    MessageSizeTooSmall { size: usize, header: usize },

    #[error("poll interval must be non-zero")]
    ZeroPollInterval,

    #[error("channels do not match the group: {0}")]
    ChannelMismatch(String),
}

/// Reasons a client submission did not commit.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{node} is not the leader of {view_id} (leader is {leader})")]
    NotLeader {
        node: NodeId,
        leader: NodeId,
        view_id: u64,
    },

    #[error("invalid request")]
    Codec(#[from] CodecError),

    #[error("failed to persist {stamp}")]
    Store {
        stamp: ViewStamp,
        #[source]
        source: StoreError,
    },

    #[error("no quorum for {stamp} after {waited:?}: {acks} of {needed} acks")]
    NoQuorum {
        stamp: ViewStamp,
        acks: usize,
        needed: usize,
        waited: Duration,
    },

    #[error("{stamp} has a quorum but is still ordered behind uncommitted {behind} after {waited:?}")]
    OrderedBehind {
        stamp: ViewStamp,
        behind: ViewStamp,
        waited: Duration,
    },

    #[error("submission of {stamp} cancelled by shutdown")]
    Cancelled { stamp: ViewStamp },

    #[error("view {view_id} has assigned every request id")]
    ViewExhausted { view_id: u64 },
}

impl SubmitError {
    /// Returns true if the request may have been replicated and a retry
    /// or view change has to decide its fate.
    pub fn is_uncertain(&self) -> bool {
        matches!(
            self,
            SubmitError::NoQuorum { .. }
                | SubmitError::OrderedBehind { .. }
                | SubmitError::Cancelled { .. }
        )
    }
}
