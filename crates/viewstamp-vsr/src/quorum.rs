//! Per-request acknowledgment tracking on the leader.

use viewstamp_types::{AckBitmap, NodeId, quorum_size};

/// Returns true if `acks` contains a majority of `group_size`.
pub fn has_quorum(acks: AckBitmap, group_size: usize) -> bool {
    acks.count() >= quorum_size(group_size)
}

/// Collects acknowledgments for one stamped request. The leader keys its
/// trackers by stamp.
///
/// The leader's own bit is set at creation: its record is durable before
/// the entry is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumTracker {
    acks: AckBitmap,
}

impl QuorumTracker {
    pub fn new(leader: NodeId) -> Self {
        Self {
            acks: AckBitmap::with(leader),
        }
    }

    pub fn acks(&self) -> AckBitmap {
        self.acks
    }

    /// Records an acknowledgment from `node`.
    ///
    /// Returns false if `node` had already acknowledged; duplicates never
    /// change the count.
    pub fn record_ack(&mut self, node: NodeId) -> bool {
        if self.acks.contains(node) {
            return false;
        }
        self.acks.set(node);
        true
    }

    pub fn has_quorum(&self, group_size: usize) -> bool {
        has_quorum(self.acks, group_size)
    }
}
