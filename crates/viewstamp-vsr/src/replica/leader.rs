//! Leader path: stamping, replication and commit.

use std::time::{Duration, Instant};

use bytes::Bytes;
use viewstamp_types::{AckBitmap, NodeId, ViewStamp};

use super::Replica;
use super::state::{AbandonedRequest, Inner, PendingRequest};
use crate::channel::Channel;
use crate::error::SubmitError;
use crate::message::{AcceptAck, LogEntry, check_entry_size};
use crate::quorum::QuorumTracker;
use crate::record::RequestRecord;

enum CommitStatus {
    Committed,
    Abandoned(AbandonedRequest),
    /// `behind` is set once the request has its own quorum and only waits
    /// for an earlier one.
    Waiting {
        acks: usize,
        behind: Option<ViewStamp>,
    },
}

impl Replica {
    /// Replicates `payload` and waits up to `timeout` for a quorum.
    ///
    /// On success the request is durable on a majority, every earlier
    /// request has committed, and the returned stamp is `<= committed`.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::NotLeader`] if this replica is not the leader
    /// - [`SubmitError::Codec`] if the payload cannot fit in one entry
    /// - [`SubmitError::Store`] if the local write failed; nothing was sent
    /// - [`SubmitError::ViewExhausted`] if the view has no request ids left
    /// - [`SubmitError::NoQuorum`] if the deadline passed or a view change
    ///   abandoned the request before a majority acked; the request may
    ///   still be durable on some replicas
    /// - [`SubmitError::OrderedBehind`] if a majority acked but an earlier
    ///   request is still uncommitted; the leader keeps resending that one
    /// - [`SubmitError::Cancelled`] if shutdown was triggered while waiting
    #[tracing::instrument(skip(self, payload), fields(node = %self.config.node_id(), bytes = payload.len()))]
    pub fn submit(&self, payload: Bytes, timeout: Duration) -> Result<ViewStamp, SubmitError> {
        check_entry_size(payload.len(), self.config.max_message_size)?;

        let started = Instant::now();
        let entry = self.stamp_and_persist(payload)?;
        let stamp = entry.stamp;

        self.broadcast(&entry);
        self.await_commit(stamp, started, started.checked_add(timeout))
    }

    /// Assigns the next stamp and makes the request durable locally.
    ///
    /// Runs entirely under the state lock. A failed write restores
    /// `highest_seen`, so the stamp is reused by the next submission.
    fn stamp_and_persist(&self, payload: Bytes) -> Result<LogEntry, SubmitError> {
        let node = self.config.node_id();
        let mut inner = self.lock();
        let state = &mut inner.state;

        if !state.is_leader() || state.highest_seen.view_id > state.cur_view.view_id {
            return Err(SubmitError::NotLeader {
                node,
                leader: state.cur_view.leader_id,
                view_id: state.cur_view.view_id,
            });
        }

        let previous = state.highest_seen;
        let Some(stamp) = previous.checked_next() else {
            return Err(SubmitError::ViewExhausted {
                view_id: previous.view_id,
            });
        };
        state.highest_seen = stamp;

        let record = RequestRecord::new(node, payload.clone());
        if let Err(source) = self.store.put(stamp.key(), record.encode()) {
            inner.state.highest_seen = previous;
            self.metrics.increment_store_failures();
            tracing::warn!(
                replica = %node,
                stamp = %stamp,
                error = %source,
                "failed to persist request, rolled back stamp"
            );
            return Err(SubmitError::Store { stamp, source });
        }

        let entry = LogEntry {
            origin: node,
            committed_hint: inner.state.committed,
            stamp,
            payload,
        };

        let now = Instant::now();
        inner.pending.insert(
            stamp,
            PendingRequest {
                tracker: QuorumTracker::new(node),
                record,
                stamped_at: now,
                last_sent: now,
                waiting: true,
            },
        );
        self.metrics.increment_submissions();
        self.metrics.set_pending_requests(inner.pending.len());

        tracing::debug!(replica = %node, stamp = %stamp, "request stamped");

        // A group of one is its own quorum.
        self.advance_commits(&mut inner);
        Ok(entry)
    }

    fn broadcast(&self, entry: &LogEntry) {
        for channel in &self.channels {
            self.send_entry_to(channel.as_ref(), entry);
        }
    }

    fn send_entry_to(&self, channel: &dyn Channel, entry: &LogEntry) {
        match channel.send_entry(entry) {
            Ok(()) => self.metrics.increment_entries_sent(),
            Err(e) => {
                self.metrics.increment_channel_failures();
                tracing::warn!(
                    replica = %self.config.node_id(),
                    peer = %channel.peer(),
                    stamp = %entry.stamp,
                    error = %e,
                    "failed to send entry"
                );
            }
        }
    }

    /// Resends every uncommitted entry that has gone `retransmit_interval`
    /// without a quorum, to the peers that have not acked it. Returns the
    /// number of entries resent.
    ///
    /// An entry lost in transit holds back every later commit until it is
    /// resent.
    pub(super) fn retransmit_pending(&self) -> usize {
        let node = self.config.node_id();
        let interval = self.config.timeouts.retransmit_interval;

        let due: Vec<(LogEntry, AckBitmap)> = {
            let mut inner = self.lock();
            if inner.pending.is_empty() {
                return 0;
            }
            let now = Instant::now();
            let committed_hint = inner.state.committed;
            inner
                .pending
                .iter_mut()
                .filter(|(_, request)| now.duration_since(request.last_sent) >= interval)
                .map(|(stamp, request)| {
                    request.last_sent = now;
                    let entry = LogEntry {
                        origin: node,
                        committed_hint,
                        stamp: *stamp,
                        payload: request.record.payload.clone(),
                    };
                    (entry, request.tracker.acks())
                })
                .collect()
        };

        for (entry, acks) in &due {
            for channel in self.channels.iter().filter(|c| !acks.contains(c.peer())) {
                self.send_entry_to(channel.as_ref(), entry);
            }
            self.metrics.increment_retransmits();
            tracing::debug!(replica = %node, stamp = %entry.stamp, acks = %acks, "resending entry");
        }
        due.len()
    }

    fn await_commit(
        &self,
        stamp: ViewStamp,
        started: Instant,
        deadline: Option<Instant>,
    ) -> Result<ViewStamp, SubmitError> {
        let needed = self.config.quorum_size();
        let poll_interval = self.config.timeouts.poll_interval;
        let group_size = self.config.group_size();

        loop {
            self.pump_acks();
            self.retransmit_pending();

            let mut inner = self.lock();
            let (acks, behind) = match commit_status(&mut inner, stamp, group_size) {
                CommitStatus::Committed => return Ok(stamp),
                CommitStatus::Abandoned(abandoned) => {
                    return Err(uncommitted(
                        stamp,
                        abandoned.acks,
                        needed,
                        abandoned.behind,
                        started.elapsed(),
                    ));
                }
                CommitStatus::Waiting { acks, behind } => (acks, behind),
            };

            if self.shutdown.is_triggered() {
                stop_waiting(&mut inner, stamp);
                return Err(SubmitError::Cancelled { stamp });
            }

            let now = Instant::now();
            let wait = match deadline {
                Some(deadline) if now >= deadline => {
                    stop_waiting(&mut inner, stamp);
                    self.metrics.increment_quorum_timeouts();
                    tracing::warn!(
                        replica = %self.config.node_id(),
                        stamp = %stamp,
                        acks,
                        needed,
                        behind = ?behind,
                        "not committed before deadline"
                    );
                    return Err(uncommitted(stamp, acks, needed, behind, started.elapsed()));
                }
                Some(deadline) => poll_interval.min(deadline - now),
                None => poll_interval,
            };

            let (guard, _) = self
                .commit_signal
                .wait_timeout(inner, wait)
                .expect("lock poisoned");
            drop(guard);
        }
    }

    /// Drains acks from every peer and routes them. Returns the number of
    /// acks handled.
    pub(super) fn pump_acks(&self) -> usize {
        let acks: Vec<(NodeId, AcceptAck)> = self
            .channels
            .iter()
            .flat_map(|channel| {
                std::iter::from_fn(move || channel.try_receive_ack())
                    .map(move |ack| (channel.peer(), ack))
            })
            .collect();
        if acks.is_empty() {
            return 0;
        }

        let mut inner = self.lock();
        for (peer, ack) in &acks {
            self.route_ack(&mut inner, *peer, *ack);
        }
        self.advance_commits(&mut inner);
        acks.len()
    }

    fn route_ack(&self, inner: &mut Inner, peer: NodeId, ack: AcceptAck) {
        let node = self.config.node_id();
        if ack.node_id != peer {
            tracing::warn!(
                replica = %node,
                peer = %peer,
                claimed = %ack.node_id,
                "dropping ack whose sender does not match its link"
            );
            return;
        }
        self.metrics.increment_acks_received();

        if let Some(request) = inner.pending.get_mut(&ack.stamp) {
            request.tracker.record_ack(peer);
            return;
        }

        if ack.stamp <= inner.state.committed {
            self.record_late_ack(peer, ack.stamp);
        } else {
            tracing::debug!(
                replica = %node,
                peer = %peer,
                stamp = %ack.stamp,
                "ignoring ack for unknown request"
            );
        }
    }

    /// Adds a follower that acked after commit to the stored bitmap.
    fn record_late_ack(&self, peer: NodeId, stamp: ViewStamp) {
        let key = stamp.key();
        let result = self
            .store
            .get(key)
            .map_err(|e| e.to_string())
            .and_then(|raw| RequestRecord::decode(&raw).map_err(|e| e.to_string()))
            .and_then(|mut record| {
                if record.ack_bitmap.contains(peer) {
                    return Ok(());
                }
                record.ack_bitmap.set(peer);
                self.store
                    .put(key, record.encode())
                    .map_err(|e| e.to_string())
            });

        if let Err(error) = result {
            tracing::debug!(
                replica = %self.config.node_id(),
                peer = %peer,
                stamp = %stamp,
                error = %error,
                "could not record late ack"
            );
        }
    }

    /// Commits every pending request at the front of the table that has a
    /// quorum, in stamp order. Stops at the first request still short of
    /// one, so later requests never commit ahead of earlier ones.
    pub(super) fn advance_commits(&self, inner: &mut Inner) {
        let group_size = self.config.group_size();
        let mut advanced = false;

        while let Some(front) = inner.pending.first_entry() {
            if !front.get().tracker.has_quorum(group_size) {
                break;
            }
            let (stamp, request) = front.remove_entry();

            let mut record = request.record;
            record.ack_bitmap = request.tracker.acks();
            if let Err(e) = self.store.put(stamp.key(), record.encode()) {
                // The record is already durable with the leader's own bit.
                self.metrics.increment_store_failures();
                tracing::warn!(
                    replica = %self.config.node_id(),
                    stamp = %stamp,
                    error = %e,
                    "failed to persist final ack bitmap"
                );
            }

            inner.state.advance_committed(stamp);
            self.metrics.increment_commits();
            self.metrics.set_committed_req_id(stamp.req_id);
            self.metrics.record_commit_latency(request.stamped_at.elapsed());
            inner.undelivered.push_back((stamp, record.payload));

            tracing::debug!(
                replica = %self.config.node_id(),
                stamp = %stamp,
                acks = %record.ack_bitmap,
                "request committed"
            );
            advanced = true;
        }

        if advanced {
            self.flush_undelivered(inner);
            self.metrics.set_pending_requests(inner.pending.len());
            self.commit_signal.notify_all();
        }
    }

    /// Hands committed records to the delivery target in stamp order.
    ///
    /// Stops at the first refusal and keeps that record and everything
    /// after it queued, so the target never sees a gap. Returns the number
    /// of records delivered.
    pub(super) fn flush_undelivered(&self, inner: &mut Inner) -> usize {
        let mut delivered = 0;
        while let Some((stamp, payload)) = inner.undelivered.front() {
            if let Err(e) = self.delivery.deliver(*stamp, payload.clone()) {
                self.metrics.increment_delivery_failures();
                tracing::debug!(
                    replica = %self.config.node_id(),
                    stamp = %stamp,
                    queued = inner.undelivered.len(),
                    error = %e,
                    "delivery refused, keeping committed records queued"
                );
                break;
            }
            inner.undelivered.pop_front();
            self.metrics.increment_records_delivered();
            delivered += 1;
        }
        delivered
    }
}

fn commit_status(inner: &mut Inner, stamp: ViewStamp, group_size: usize) -> CommitStatus {
    if let Some(abandoned) = inner.abandoned.remove(&stamp) {
        return CommitStatus::Abandoned(abandoned);
    }
    match inner.pending.get(&stamp) {
        Some(request) => {
            let behind = if request.tracker.has_quorum(group_size) {
                inner.pending.keys().next().copied().filter(|front| *front < stamp)
            } else {
                None
            };
            CommitStatus::Waiting {
                acks: request.tracker.acks().count(),
                behind,
            }
        }
        None if inner.state.committed >= stamp => CommitStatus::Committed,
        None => CommitStatus::Abandoned(AbandonedRequest {
            acks: 0,
            behind: None,
        }),
    }
}

/// The error for a request that gave up before committing.
fn uncommitted(
    stamp: ViewStamp,
    acks: usize,
    needed: usize,
    behind: Option<ViewStamp>,
    waited: Duration,
) -> SubmitError {
    match behind {
        Some(behind) => SubmitError::OrderedBehind {
            stamp,
            behind,
            waited,
        },
        None => SubmitError::NoQuorum {
            stamp,
            acks,
            needed,
            waited,
        },
    }
}

/// Marks a request as no longer awaited. It stays pending: a later quorum
/// still commits it in order.
fn stop_waiting(inner: &mut Inner, stamp: ViewStamp) {
    if let Some(request) = inner.pending.get_mut(&stamp) {
        request.waiting = false;
    }
}
