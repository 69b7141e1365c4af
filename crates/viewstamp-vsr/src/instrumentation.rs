//! Replica instrumentation.
//!
//! Every replica owns one [`Metrics`] instance of lock-free counters,
//! gauges and a commit latency histogram. [`Metrics::snapshot`] copies them
//! into a plain [`MetricsSnapshot`] for reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds (ms) of the commit latency buckets. The last bucket is +Inf.
const COMMIT_LATENCY_BOUNDS_MS: [u64; 7] = [1, 5, 10, 50, 100, 500, 1000];

#[derive(Debug, Default)]
pub struct Metrics {
    // === Leader ===
    submissions_total: AtomicU64,
    commits_total: AtomicU64,
    quorum_timeouts_total: AtomicU64,
    entries_sent_total: AtomicU64,
    retransmits_total: AtomicU64,
    acks_received_total: AtomicU64,

    // === Follower ===
    entries_accepted_total: AtomicU64,
    entries_dropped_total: AtomicU64,
    acks_sent_total: AtomicU64,

    // === Shared ===
    records_delivered_total: AtomicU64,
    delivery_failures_total: AtomicU64,
    store_failures_total: AtomicU64,
    channel_failures_total: AtomicU64,

    // === Gauges ===
    view_id: AtomicU64,
    committed_req_id: AtomicU64,
    pending_requests: AtomicU64,

    // === Commit latency ===
    commit_latency_buckets: [AtomicU64; COMMIT_LATENCY_BOUNDS_MS.len() + 1],
    commit_latency_sum_ns: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment_submissions(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_commits(&self) {
        self.commits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_quorum_timeouts(&self) {
        self.quorum_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_entries_sent(&self) {
        self.entries_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_retransmits(&self) {
        self.retransmits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_acks_received(&self) {
        self.acks_received_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_entries_accepted(&self) {
        self.entries_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_entries_dropped(&self) {
        self.entries_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_acks_sent(&self) {
        self.acks_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_records_delivered(&self) {
        self.records_delivered_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_delivery_failures(&self) {
        self.delivery_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_store_failures(&self) {
        self.store_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_channel_failures(&self) {
        self.channel_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_view_id(&self, view_id: u64) {
        self.view_id.store(view_id, Ordering::Relaxed);
    }

    pub(crate) fn set_committed_req_id(&self, req_id: u64) {
        self.committed_req_id.store(req_id, Ordering::Relaxed);
    }

    pub(crate) fn set_pending_requests(&self, pending: usize) {
        self.pending_requests.store(pending as u64, Ordering::Relaxed);
    }

    /// Records the time from stamping a request to its commit.
    pub(crate) fn record_commit_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let bucket = COMMIT_LATENCY_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(COMMIT_LATENCY_BOUNDS_MS.len());
        self.commit_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.commit_latency_sum_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let commits = load(&self.commits_total);
        let latency_sum = load(&self.commit_latency_sum_ns);

        MetricsSnapshot {
            submissions: load(&self.submissions_total),
            commits,
            quorum_timeouts: load(&self.quorum_timeouts_total),
            entries_sent: load(&self.entries_sent_total),
            retransmits: load(&self.retransmits_total),
            acks_received: load(&self.acks_received_total),
            entries_accepted: load(&self.entries_accepted_total),
            entries_dropped: load(&self.entries_dropped_total),
            acks_sent: load(&self.acks_sent_total),
            records_delivered: load(&self.records_delivered_total),
            delivery_failures: load(&self.delivery_failures_total),
            store_failures: load(&self.store_failures_total),
            channel_failures: load(&self.channel_failures_total),
            view_id: load(&self.view_id),
            committed_req_id: load(&self.committed_req_id),
            pending_requests: load(&self.pending_requests),
            mean_commit_latency: Duration::from_nanos(latency_sum.checked_div(commits).unwrap_or(0)),
        }
    }
}

/// Point-in-time copy of a replica's [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submissions: u64,
    pub commits: u64,
    pub quorum_timeouts: u64,
    pub entries_sent: u64,
    /// Uncommitted entries resent after `retransmit_interval`.
    pub retransmits: u64,
    pub acks_received: u64,
    pub entries_accepted: u64,
    pub entries_dropped: u64,
    pub acks_sent: u64,
    pub records_delivered: u64,
    pub delivery_failures: u64,
    pub store_failures: u64,
    pub channel_failures: u64,
    pub view_id: u64,
    pub committed_req_id: u64,
    pub pending_requests: u64,
    /// Mean commit latency on the leader; zero before the first commit.
    pub mean_commit_latency: Duration,
}
