//! Follower path: accepting entries and delivering committed records.

use viewstamp_types::{AckBitmap, Timestamp, ViewStamp};

use super::state::{ConsensusState, Inner};
use super::{AcceptOutcome, DropReason, Replica};
use crate::message::{AcceptAck, LogEntry};
use crate::record::RequestRecord;

impl Replica {
    /// Validates, persists and acknowledges one entry, then delivers any
    /// records its `committed_hint` reveals as committed.
    ///
    /// Entries from an older view, or from anyone but the leader of the
    /// current view, are dropped without persisting or acking. Entries
    /// from a newer view are accepted: the election service may not have
    /// announced that view here yet.
    pub fn process_entry(&self, entry: LogEntry) -> AcceptOutcome {
        let node = self.config.node_id();
        let stamp = entry.stamp;

        {
            let mut inner = self.lock();

            if let Some(reason) = self.check_entry(&inner.state, &entry) {
                self.metrics.increment_entries_dropped();
                tracing::debug!(
                    replica = %node,
                    origin = %entry.origin,
                    stamp = %stamp,
                    ?reason,
                    "dropping entry"
                );
                return AcceptOutcome::Dropped { stamp, reason };
            }

            let previous = inner.state.highest_seen;
            inner.state.observe(stamp);

            let mut ack_bitmap = AckBitmap::with(entry.origin);
            ack_bitmap.set(node);
            let record = RequestRecord {
                created_at: Timestamp::now(),
                ack_bitmap,
                payload: entry.payload.clone(),
            };

            if let Err(error) = self.store.put(stamp.key(), record.encode()) {
                inner.state.highest_seen = previous;
                self.metrics.increment_store_failures();
                tracing::warn!(
                    replica = %node,
                    stamp = %stamp,
                    error = %error,
                    "failed to persist entry"
                );
                return AcceptOutcome::Failed { stamp, error };
            }
            self.metrics.increment_entries_accepted();
        }

        let acked = self.send_ack(&entry);

        let delivered = {
            let mut inner = self.lock();
            self.deliver_committed(&mut inner, entry.committed_hint)
        };

        AcceptOutcome::Accepted {
            stamp,
            acked,
            delivered,
        }
    }

    fn check_entry(&self, state: &ConsensusState, entry: &LogEntry) -> Option<DropReason> {
        let view = state.cur_view;
        if !self.config.contains(entry.origin) {
            return Some(DropReason::UnknownOrigin {
                origin: entry.origin,
            });
        }
        if entry.stamp.view_id < view.view_id {
            return Some(DropReason::StaleView {
                entry_view: entry.stamp.view_id,
                current_view: view.view_id,
            });
        }
        if entry.stamp.view_id == view.view_id && entry.origin != view.leader_id {
            return Some(DropReason::WrongLeader {
                origin: entry.origin,
                leader: view.leader_id,
            });
        }
        None
    }

    fn send_ack(&self, entry: &LogEntry) -> bool {
        let node = self.config.node_id();
        let Some(channel) = self.channel_to(entry.origin) else {
            tracing::warn!(replica = %node, origin = %entry.origin, "no channel to entry origin");
            return false;
        };

        match channel.send_ack(&AcceptAck::new(node, entry.stamp)) {
            Ok(()) => {
                self.metrics.increment_acks_sent();
                true
            }
            Err(e) => {
                self.metrics.increment_channel_failures();
                tracing::warn!(
                    replica = %node,
                    origin = %entry.origin,
                    stamp = %entry.stamp,
                    error = %e,
                    "failed to send ack"
                );
                false
            }
        }
    }

    /// Delivers stored records in `(committed, hint]` in stamp order and
    /// advances `committed` to the last one delivered.
    ///
    /// Stops early at a missing record, an unreadable record or a delivery
    /// failure; a later hint retries from the same point.
    pub(super) fn deliver_committed(&self, inner: &mut Inner, hint: ViewStamp) -> usize {
        let node = self.config.node_id();
        let committed = inner.state.committed;
        if hint <= committed {
            return 0;
        }
        // Records committed while this replica led go out first.
        self.flush_undelivered(inner);
        if !inner.undelivered.is_empty() {
            return 0;
        }

        let records = match self.store.range(committed.key(), hint.key()) {
            Ok(records) => records,
            Err(e) => {
                self.metrics.increment_store_failures();
                tracing::warn!(replica = %node, error = %e, "failed to read committed records");
                return 0;
            }
        };

        let mut last = committed;
        let mut delivered = 0;
        for (key, value) in records {
            let stamp = key.stamp();
            if stamp <= committed {
                continue;
            }

            let predecessor = if stamp.view_id == last.view_id {
                last
            } else {
                ViewStamp::first_in_view(stamp.view_id)
            };
            if !predecessor.is_followed_by(&stamp) {
                tracing::debug!(
                    replica = %node,
                    after = %last,
                    found = %stamp,
                    "gap before commit hint, waiting for missing entry"
                );
                break;
            }

            let record = match RequestRecord::decode(&value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(replica = %node, stamp = %stamp, error = %e, "unreadable stored record");
                    break;
                }
            };

            if let Err(e) = self.delivery.deliver(stamp, record.payload) {
                self.metrics.increment_delivery_failures();
                tracing::warn!(replica = %node, stamp = %stamp, error = %e, "delivery failed");
                break;
            }

            self.metrics.increment_records_delivered();
            last = stamp;
            delivered += 1;
        }

        if inner.state.advance_committed(last) {
            self.metrics.set_committed_req_id(last.req_id);
            tracing::debug!(replica = %node, committed = %last, delivered, "advanced commit pointer");
        }
        delivered
    }
}
