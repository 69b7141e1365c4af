//! The replica: one node's consensus state machine.
//!
//! # Protocol Overview
//!
//! ```text
//! Client ──submit──► Leader
//!                      │ stamp, persist
//!                      ├──LogEntry──► Follower₁ ── persist ─┐
//!                      ├──LogEntry──► Follower₂ ── persist ─┤
//!                      │                                     │
//!                      │◄──────────AcceptAck─────────────────┘
//!                      │ quorum: commit, deliver
//! Client ◄──stamp──────┘
//! ```
//!
//! Followers learn the commit pointer from the `committed_hint` carried by
//! later entries and deliver every record up to it from their own store.
//!
//! # Concurrency
//!
//! All consensus state sits behind one mutex. The lock covers an in-memory
//! update together with its `RecordStore::put`, so no thread can observe
//! `highest_seen` ahead of a durable record. Channel sends and quorum waits
//! happen outside the lock. Waiting submitters sleep on a condition
//! variable that is signalled on every commit and view change, and re-poll
//! at least once per `poll_interval`.
//!
//! Any thread may drain acks: a waiting submitter and the accept loop both
//! route whatever acks they find to the pending request they belong to.

mod follower;
mod leader;
mod state;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use viewstamp_storage::{RecordStore, StoreError};
use viewstamp_types::{NodeId, View, ViewStamp};

pub use state::{ConsensusState, Role};

use crate::channel::Channel;
use crate::config::ClusterConfig;
use crate::delivery::{Delivery, NullDelivery};
use crate::error::ConfigError;
use crate::instrumentation::{Metrics, MetricsSnapshot};
use crate::shutdown::Shutdown;
use state::{AbandonedRequest, Inner};

/// Entries taken from one peer per accept pass before moving to the next.
const ACCEPT_BATCH: usize = 64;

// ============================================================================
// Accept outcomes
// ============================================================================

/// Result of handling one inbound [`LogEntry`](crate::LogEntry).
#[derive(Debug)]
pub enum AcceptOutcome {
    /// The entry is durable. `acked` is false if the ack could not be sent;
    /// `delivered` counts records handed to the output collaborator.
    Accepted {
        stamp: ViewStamp,
        acked: bool,
        delivered: usize,
    },

    /// The entry was ignored. Nothing was persisted or acknowledged.
    Dropped { stamp: ViewStamp, reason: DropReason },

    /// The local store rejected the entry. Nothing was acknowledged.
    Failed { stamp: ViewStamp, error: StoreError },
}

/// Why an inbound entry was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The entry's view is older than the replica's current view.
    StaleView { entry_view: u64, current_view: u64 },

    /// The entry is from the current view but not from its leader.
    WrongLeader { origin: NodeId, leader: NodeId },

    /// The origin is not a member of the group.
    UnknownOrigin { origin: NodeId },
}

// ============================================================================
// Replica
// ============================================================================

/// A replica of a primary-backup group.
///
/// Shared between the thread running [`Replica::accept_loop`] and any
/// number of submitting threads, typically as an `Arc<Replica>`.
pub struct Replica {
    config: ClusterConfig,
    inner: Mutex<Inner>,
    commit_signal: Condvar,
    store: Arc<dyn RecordStore>,
    /// One channel per peer, ascending by peer id.
    channels: Vec<Arc<dyn Channel>>,
    delivery: Arc<dyn Delivery>,
    shutdown: Shutdown,
    metrics: Metrics,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("config", &self.config)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl Replica {
    /// Creates a replica in `view` with one channel per peer.
    pub fn new(
        config: ClusterConfig,
        view: View,
        store: Arc<dyn RecordStore>,
        mut channels: Vec<Arc<dyn Channel>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if !config.contains(view.leader_id) {
            return Err(ConfigError::NodeOutOfRange {
                node: view.leader_id,
                group_size: config.group_size(),
            });
        }

        channels.sort_by_key(|c| c.peer());
        let peers: Vec<NodeId> = channels.iter().map(|c| c.peer()).collect();
        let expected: Vec<NodeId> = config.peers().collect();
        if peers != expected {
            return Err(ConfigError::ChannelMismatch(format!(
                "expected peers {expected:?}, got {peers:?}"
            )));
        }

        let state = ConsensusState::new(config.node_id(), config.group_size(), view);
        let metrics = Metrics::new();
        metrics.set_view_id(view.view_id);

        tracing::info!(
            node = %config.node_id(),
            group_size = config.group_size(),
            view = view.view_id,
            role = %state.role,
            "replica created"
        );

        Ok(Self {
            config,
            inner: Mutex::new(Inner::new(state)),
            commit_signal: Condvar::new(),
            store,
            channels,
            delivery: Arc::new(NullDelivery),
            shutdown: Shutdown::new(),
            metrics,
        })
    }

    /// Sets where committed records are delivered.
    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = delivery;
        self
    }

    /// Shares a shutdown signal with other components.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Seeds `highest_seen` from the newest record in the store.
    ///
    /// Call once after [`Replica::new`] when reopening a durable store.
    /// `committed` is not persisted and restarts at the beginning of the
    /// view, so records may be delivered again after a restart.
    pub fn recover(self) -> Result<Self, StoreError> {
        if let Some(key) = self.store.last_key()? {
            let mut inner = self.lock();
            let last = key.stamp();
            if last.view_id > inner.state.cur_view.view_id {
                tracing::warn!(
                    node = %self.config.node_id(),
                    stored = %last,
                    view = inner.state.cur_view.view_id,
                    "store holds records from a newer view"
                );
            }
            inner.state.observe(last);
            tracing::info!(
                node = %self.config.node_id(),
                highest_seen = %inner.state.highest_seen,
                "recovered from store"
            );
        }
        Ok(self)
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// A snapshot of the consensus state.
    pub fn state(&self) -> ConsensusState {
        self.lock().state
    }

    pub fn is_leader(&self) -> bool {
        self.lock().state.is_leader()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Installs a view announced by the election service.
    ///
    /// Views older than the current one are ignored. Entering a newer view
    /// abandons every request still waiting for quorum; their submitters
    /// get [`SubmitError::NoQuorum`](crate::SubmitError::NoQuorum).
    /// Returns false if the view was ignored.
    pub fn on_view_change(&self, view: View) -> bool {
        let node = self.config.node_id();
        let mut inner = self.lock();
        let current = inner.state.cur_view;

        if view.view_id < current.view_id {
            tracing::debug!(
                node = %node,
                announced = view.view_id,
                current = current.view_id,
                "ignoring view change to an older view"
            );
            return false;
        }
        if !self.config.contains(view.leader_id) {
            tracing::warn!(
                node = %node,
                leader = %view.leader_id,
                "ignoring view change naming a leader outside the group"
            );
            return false;
        }

        let state = &mut inner.state;
        state.cur_view = view;
        state.role = Role::in_view(&view, node);
        state.observe(ViewStamp::first_in_view(view.view_id));
        let role = state.role;

        if view.view_id > current.view_id {
            let abandoned = self.abandon_pending(&mut inner);
            if abandoned > 0 {
                tracing::warn!(
                    node = %node,
                    abandoned,
                    view = view.view_id,
                    "abandoned uncommitted requests on view change"
                );
            }
        }

        self.metrics.set_view_id(view.view_id);
        tracing::info!(node = %node, view = view.view_id, leader = %view.leader_id, role = %role, "entered view");
        true
    }

    /// Handles whatever acks and entries are waiting, without blocking.
    ///
    /// A leader also resends entries still short of a quorum and retries
    /// committed records the delivery target refused earlier. Returns the
    /// number of messages processed.
    pub fn accept_once(&self) -> usize {
        let mut processed = self.pump_acks();
        self.retransmit_pending();
        {
            let mut inner = self.lock();
            if !inner.undelivered.is_empty() {
                self.flush_undelivered(&mut inner);
            }
        }

        for channel in &self.channels {
            for _ in 0..ACCEPT_BATCH {
                let Some(entry) = channel.try_receive_entry() else {
                    break;
                };
                self.process_entry(entry);
                processed += 1;
            }
        }
        processed
    }

    /// Runs [`Replica::accept_once`] until shutdown is triggered, sleeping
    /// for `poll_interval` whenever a pass finds nothing to do.
    pub fn accept_loop(&self) {
        let node = self.config.node_id();
        tracing::info!(node = %node, "accept loop started");

        while !self.shutdown.is_triggered() {
            if self.accept_once() == 0 {
                thread::sleep(self.config.timeouts.poll_interval);
            }
        }

        tracing::info!(node = %node, "accept loop stopped");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("lock poisoned")
    }

    fn channel_to(&self, peer: NodeId) -> Option<&Arc<dyn Channel>> {
        self.channels
            .binary_search_by_key(&peer, |c| c.peer())
            .ok()
            .map(|i| &self.channels[i])
    }

    /// Drops every pending request, remembering the ones a submitter is
    /// still waiting on.
    fn abandon_pending(&self, inner: &mut Inner) -> usize {
        let group_size = self.config.group_size();
        let pending = std::mem::take(&mut inner.pending);
        let count = pending.len();
        // Anything with a quorum was only waiting on the first request.
        let front = pending.keys().next().copied();
        inner.abandoned.extend(
            pending
                .into_iter()
                .filter(|(_, request)| request.waiting)
                .map(|(stamp, request)| {
                    let behind = front.filter(|_| request.tracker.has_quorum(group_size));
                    let abandoned = AbandonedRequest {
                        acks: request.tracker.acks().count(),
                        behind,
                    };
                    (stamp, abandoned)
                }),
        );
        self.metrics.set_pending_requests(0);
        self.commit_signal.notify_all();
        count
    }
}
