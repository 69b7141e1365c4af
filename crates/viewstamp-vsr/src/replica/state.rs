//! Consensus state and the pending-request table.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::time::Instant;

use bytes::Bytes;

use viewstamp_types::{NodeId, View, ViewStamp};

use crate::quorum::QuorumTracker;
use crate::record::RequestRecord;

/// Whether this replica stamps requests or accepts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Leader,
    Secondary,
}

impl Role {
    /// The role `node` holds in `view`.
    pub fn in_view(view: &View, node: NodeId) -> Self {
        if view.is_leader(node) {
            Role::Leader
        } else {
            Role::Secondary
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Leader => write!(f, "leader"),
            Role::Secondary => write!(f, "secondary"),
        }
    }
}

/// Per-replica consensus state.
///
/// # Invariants
///
/// - `committed <= highest_seen`
/// - `highest_seen` and `committed` never decrease, except that a failed
///   leader write rolls `highest_seen` back to the value it had before the
///   write began
/// - every stamp in `(committed, highest_seen]` that this replica assigned
///   or accepted has a durable record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusState {
    pub node_id: NodeId,
    pub group_size: usize,
    pub role: Role,
    pub cur_view: View,
    pub highest_seen: ViewStamp,
    pub committed: ViewStamp,
}

impl ConsensusState {
    pub fn new(node_id: NodeId, group_size: usize, view: View) -> Self {
        let start = ViewStamp::first_in_view(view.view_id);
        Self {
            node_id,
            group_size,
            role: Role::in_view(&view, node_id),
            cur_view: view,
            highest_seen: start,
            committed: start,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Raises `highest_seen` to `stamp` if it is newer.
    pub(crate) fn observe(&mut self, stamp: ViewStamp) {
        if stamp > self.highest_seen {
            self.highest_seen = stamp;
        }
    }

    /// Raises `committed` to `stamp` if it is newer. Returns true on change.
    pub(crate) fn advance_committed(&mut self, stamp: ViewStamp) -> bool {
        if stamp <= self.committed {
            return false;
        }
        self.committed = stamp;
        if stamp > self.highest_seen {
            self.highest_seen = stamp;
        }
        true
    }
}

/// A stamped request on the leader that has not committed yet.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub tracker: QuorumTracker,
    pub record: RequestRecord,
    pub stamped_at: Instant,
    /// Last time the entry went out to the peers that had not acked it.
    pub last_sent: Instant,
    /// False once the submitter has given up waiting.
    pub waiting: bool,
}

/// A request dropped by a view change while its submitter still waited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AbandonedRequest {
    pub acks: usize,
    /// The uncommitted request it was queued behind, if it had reached a
    /// quorum of its own.
    pub behind: Option<ViewStamp>,
}

/// Everything guarded by the replica's state lock.
#[derive(Debug)]
pub(crate) struct Inner {
    pub state: ConsensusState,
    /// Leader only: uncommitted requests in stamp order.
    pub pending: BTreeMap<ViewStamp, PendingRequest>,
    /// Requests dropped by a view change while their submitter was still
    /// waiting. Each submitter removes its own entry.
    pub abandoned: BTreeMap<ViewStamp, AbandonedRequest>,
    /// Leader only: committed records the delivery target has not taken
    /// yet, in stamp order.
    pub undelivered: VecDeque<(ViewStamp, Bytes)>,
}

impl Inner {
    pub fn new(state: ConsensusState) -> Self {
        Self {
            state,
            pending: BTreeMap::new(),
            abandoned: BTreeMap::new(),
            undelivered: VecDeque::new(),
        }
    }
}
