//! Replica-level tests over an in-process network.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;
use viewstamp_storage::{FileStore, MemoryStore, RecordRange, RecordStore, StoreError};
use viewstamp_types::{NodeId, View, ViewStamp, ViewStampKey};

use crate::*;

const LONG: Duration = Duration::from_secs(10);

fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        quorum_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(1),
        retransmit_interval: Duration::from_millis(20),
    }
}

fn stamp(view: u64, req: u64) -> ViewStamp {
    ViewStamp::new(view, req)
}

// ============================================================================
// Harness
// ============================================================================

struct Cluster {
    network: MemoryNetwork,
    replicas: Vec<Arc<Replica>>,
    stores: Vec<Arc<MemoryStore>>,
    outputs: Vec<Arc<RecordingDelivery>>,
    shutdown: Shutdown,
}

impl Cluster {
    /// A group led by node 0 in the initial view.
    fn new(group_size: usize) -> Self {
        Self::with_timeouts(group_size, fast_timeouts())
    }

    fn with_timeouts(group_size: usize, timeouts: TimeoutConfig) -> Self {
        let network = MemoryNetwork::new(group_size, 1024, DEFAULT_MAX_MESSAGE_SIZE);
        let shutdown = Shutdown::new();
        let mut replicas = Vec::new();
        let mut stores = Vec::new();
        let mut outputs = Vec::new();

        for id in 0..group_size {
            let node = NodeId::new(id as u8);
            let config = ClusterConfig::new(node, group_size)
                .unwrap()
                .with_timeouts(timeouts);
            let store = Arc::new(MemoryStore::new());
            let output = Arc::new(RecordingDelivery::new());
            let replica = Replica::new(
                config,
                View::initial(NodeId::new(0)),
                store.clone(),
                network.channels_for(node),
            )
            .unwrap()
            .with_delivery(output.clone())
            .with_shutdown(shutdown.clone());

            replicas.push(Arc::new(replica));
            stores.push(store);
            outputs.push(output);
        }

        Self {
            network,
            replicas,
            stores,
            outputs,
            shutdown,
        }
    }

    fn node(&self, id: usize) -> &Arc<Replica> {
        &self.replicas[id]
    }

    /// Runs `f` while every replica polls its channels on its own thread.
    fn with_replicas_running<R>(&self, f: impl FnOnce() -> R) -> R {
        let stop = AtomicBool::new(false);
        thread::scope(|s| {
            let stop = &stop;
            for replica in &self.replicas {
                s.spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        if replica.accept_once() == 0 {
                            thread::sleep(Duration::from_millis(1));
                        }
                    }
                });
            }
            let _guard = StopOnDrop(stop);
            f()
        })
    }

    /// Processes everything in flight until the network is quiet.
    fn settle(&self) {
        while self.replicas.iter().map(|r| r.accept_once()).sum::<usize>() > 0 {}
    }
}

struct StopOnDrop<'a>(&'a AtomicBool);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A follower (node 1 of 3) plus node 0's and node 2's ends of its links.
struct Follower {
    replica: Replica,
    store: Arc<MemoryStore>,
    output: Arc<RecordingDelivery>,
    leader_link: Arc<dyn Channel>,
    other_link: Arc<dyn Channel>,
}

fn follower() -> Follower {
    let network = MemoryNetwork::new(3, 64, DEFAULT_MAX_MESSAGE_SIZE);
    let node = NodeId::new(1);
    let store = Arc::new(MemoryStore::new());
    let output = Arc::new(RecordingDelivery::new());
    let replica = Replica::new(
        ClusterConfig::new(node, 3).unwrap(),
        View::initial(NodeId::new(0)),
        store.clone(),
        network.channels_for(node),
    )
    .unwrap()
    .with_delivery(output.clone());

    let link_from = |from: u8| {
        network
            .channels_for(NodeId::new(from))
            .into_iter()
            .find(|c| c.peer() == node)
            .unwrap()
    };

    Follower {
        leader_link: link_from(0),
        other_link: link_from(2),
        replica,
        store,
        output,
    }
}

fn entry_from(origin: u8, stamp: ViewStamp, hint: ViewStamp) -> LogEntry {
    LogEntry::encode(
        NodeId::new(origin),
        hint,
        stamp,
        Bytes::from(format!("payload {stamp}")),
        DEFAULT_MAX_MESSAGE_SIZE,
    )
    .unwrap()
}

/// A store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_puts: AtomicBool,
}

impl RecordStore for FlakyStore {
    fn put(&self, key: ViewStampKey, value: Bytes) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::Acquire) {
            return Err(StoreError::Io(io::Error::other("disk full")));
        }
        self.inner.put(key, value)
    }

    fn get(&self, key: ViewStampKey) -> Result<Bytes, StoreError> {
        self.inner.get(key)
    }

    fn range(&self, start: ViewStampKey, end: ViewStampKey) -> Result<RecordRange, StoreError> {
        self.inner.range(start, end)
    }

    fn last_key(&self) -> Result<Option<ViewStampKey>, StoreError> {
        self.inner.last_key()
    }
}

// ============================================================================
// Leader
// ============================================================================

#[test]
fn three_node_submit_commits_first_stamp() {
    let cluster = Cluster::new(3);
    let leader = cluster.node(0);

    let assigned = cluster
        .with_replicas_running(|| leader.submit(Bytes::from_static(b"D1"), LONG))
        .unwrap();

    assert_eq!(assigned, stamp(1, 1));
    assert_eq!(leader.state().committed, stamp(1, 1));
    assert_eq!(cluster.outputs[0].stamps(), vec![stamp(1, 1)]);

    // Acks that arrive after commit still land in the stored bitmap.
    cluster.settle();
    let record = RequestRecord::decode(&cluster.stores[0].get(assigned.key()).unwrap()).unwrap();
    assert_eq!(record.ack_bitmap.count(), 3);
    assert!(has_quorum(record.ack_bitmap, 3));
    assert_eq!(record.payload, Bytes::from_static(b"D1"));
}

#[test]
fn single_node_commits_without_acks() {
    let output = Arc::new(RecordingDelivery::new());
    let replica = Replica::new(
        ClusterConfig::single_node(),
        View::initial(NodeId::new(0)),
        Arc::new(MemoryStore::new()),
        Vec::new(),
    )
    .unwrap()
    .with_delivery(output.clone());

    let assigned = replica
        .submit(Bytes::from_static(b"solo"), Duration::ZERO)
        .unwrap();

    assert_eq!(assigned, stamp(1, 1));
    assert_eq!(replica.state().committed, stamp(1, 1));
    assert_eq!(output.delivered()[0].payload, Bytes::from_static(b"solo"));
    assert_eq!(replica.metrics().commits, 1);
}

#[test]
fn secondary_rejects_submit() {
    let cluster = Cluster::new(3);
    let err = cluster
        .node(2)
        .submit(Bytes::from_static(b"x"), LONG)
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::NotLeader { leader, view_id: 1, .. } if leader == NodeId::new(0)
    ));
    assert_eq!(cluster.node(2).state().highest_seen, stamp(1, 0));
}

#[test]
fn oversized_payload_is_rejected_before_stamping() {
    let replica = Replica::new(
        ClusterConfig::single_node().with_max_message_size(ENTRY_HEADER_SIZE + 8),
        View::initial(NodeId::new(0)),
        Arc::new(MemoryStore::new()),
        Vec::new(),
    )
    .unwrap();

    let err = replica
        .submit(Bytes::from_static(b"123456789"), LONG)
        .unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Codec(CodecError::InvalidSize { .. })
    ));
    assert_eq!(replica.state().highest_seen, stamp(1, 0));

    replica
        .submit(Bytes::from_static(b"12345678"), LONG)
        .unwrap();
}

#[test]
fn isolated_leader_reports_no_quorum() {
    let cluster = Cluster::new(3);
    cluster.network.isolate(NodeId::new(0));
    let leader = cluster.node(0);

    let err = leader
        .submit(Bytes::from_static(b"lost"), Duration::from_millis(50))
        .unwrap_err();

    match err {
        SubmitError::NoQuorum {
            stamp: s,
            acks,
            needed,
            waited,
        } => {
            assert_eq!(s, stamp(1, 1));
            assert_eq!(acks, 1);
            assert_eq!(needed, 2);
            assert!(waited >= Duration::from_millis(50));
        }
        other => panic!("expected NoQuorum, got {other:?}"),
    }

    let state = leader.state();
    assert_eq!(state.highest_seen, stamp(1, 1));
    assert_eq!(state.committed, stamp(1, 0));
    assert_eq!(leader.metrics().quorum_timeouts, 1);
    assert!(cluster.outputs[0].is_empty());
}

#[test]
fn timed_out_request_commits_once_partition_heals() {
    let cluster = Cluster::new(3);
    let leader = cluster.node(0);

    cluster.network.isolate(NodeId::new(0));
    let err = leader
        .submit(Bytes::from_static(b"first"), Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, SubmitError::NoQuorum { stamp: s, .. } if s == stamp(1, 1)));

    cluster.network.heal();
    let assigned = cluster
        .with_replicas_running(|| leader.submit(Bytes::from_static(b"second"), LONG))
        .unwrap();

    assert_eq!(assigned, stamp(1, 2));
    assert_eq!(leader.state().committed, stamp(1, 2));
    assert_eq!(cluster.outputs[0].stamps(), vec![stamp(1, 1), stamp(1, 2)]);
    assert_eq!(leader.metrics().pending_requests, 0);
    assert!(leader.metrics().retransmits >= 1);

    cluster.settle();
    assert!(cluster.stores[1].get(stamp(1, 1).key()).is_ok());
    assert!(cluster.stores[2].get(stamp(1, 1).key()).is_ok());
}

#[test]
fn quorum_behind_a_stuck_request_is_not_reported_as_no_quorum() {
    let timeouts = TimeoutConfig {
        retransmit_interval: Duration::from_secs(3600),
        ..fast_timeouts()
    };
    let cluster = Cluster::with_timeouts(3, timeouts);
    let leader = cluster.node(0);

    cluster.network.isolate(NodeId::new(0));
    leader
        .submit(Bytes::from_static(b"first"), Duration::from_millis(10))
        .unwrap_err();
    cluster.network.heal();

    let err = cluster
        .with_replicas_running(|| {
            leader.submit(Bytes::from_static(b"second"), Duration::from_millis(200))
        })
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::OrderedBehind { stamp: s, behind, .. }
            if s == stamp(1, 2) && behind == stamp(1, 1)
    ));
    assert!(err.is_uncertain());
    assert_eq!(leader.state().committed, stamp(1, 0));
}

#[test]
fn refused_delivery_is_retried_in_order() {
    let queue = Arc::new(QueueDelivery::new(1));
    let replica = Replica::new(
        ClusterConfig::single_node(),
        View::initial(NodeId::new(0)),
        Arc::new(MemoryStore::new()),
        Vec::new(),
    )
    .unwrap()
    .with_delivery(queue.clone());

    let mut seen = Vec::new();
    replica.submit(Bytes::from_static(b"a"), LONG).unwrap();
    replica.submit(Bytes::from_static(b"b"), LONG).unwrap();
    assert_eq!(replica.metrics().delivery_failures, 1);
    seen.extend(queue.drain());

    replica.submit(Bytes::from_static(b"c"), LONG).unwrap();
    seen.extend(queue.drain());
    assert_eq!(replica.state().committed, stamp(1, 3));

    replica.accept_once();
    seen.extend(queue.drain());

    let stamps: Vec<_> = seen.iter().map(|d| d.stamp).collect();
    assert_eq!(stamps, vec![stamp(1, 1), stamp(1, 2), stamp(1, 3)]);
    assert_eq!(seen[1].payload, Bytes::from_static(b"b"));
    assert_eq!(replica.metrics().records_delivered, 3);
}

#[test]
fn leader_with_no_request_ids_left_refuses_to_stamp() {
    let f = follower();
    let last = stamp(1, u64::MAX);
    assert!(matches!(
        f.replica.process_entry(entry_from(0, last, stamp(1, 0))),
        AcceptOutcome::Accepted { .. }
    ));

    assert!(f.replica.on_view_change(View::new(1, NodeId::new(1))));
    let err = f.replica.submit(Bytes::from_static(b"x"), LONG).unwrap_err();

    assert!(matches!(err, SubmitError::ViewExhausted { view_id: 1 }));
    assert!(!err.is_uncertain());
    assert_eq!(f.replica.state().highest_seen, last);
}

#[test]
fn one_lost_follower_still_leaves_a_quorum() {
    let cluster = Cluster::new(3);
    cluster.network.disconnect(NodeId::new(0), NodeId::new(2));
    let leader = cluster.node(0);

    let assigned = cluster
        .with_replicas_running(|| leader.submit(Bytes::from_static(b"ok"), LONG))
        .unwrap();

    assert_eq!(assigned, stamp(1, 1));
    assert!(cluster.stores[2].is_empty());
    assert_eq!(cluster.stores[1].len(), 1);
}

#[test]
fn failed_persist_rolls_back_stamp() {
    let store = Arc::new(FlakyStore::default());
    let replica = Replica::new(
        ClusterConfig::single_node(),
        View::initial(NodeId::new(0)),
        store.clone(),
        Vec::new(),
    )
    .unwrap();

    store.fail_puts.store(true, Ordering::Release);
    let err = replica.submit(Bytes::from_static(b"a"), LONG).unwrap_err();
    assert!(matches!(err, SubmitError::Store { stamp: s, .. } if s == stamp(1, 1)));
    assert!(!err.is_uncertain());
    assert_eq!(replica.state().highest_seen, stamp(1, 0));
    assert_eq!(replica.metrics().store_failures, 1);

    store.fail_puts.store(false, Ordering::Release);
    assert_eq!(
        replica.submit(Bytes::from_static(b"a"), LONG).unwrap(),
        stamp(1, 1)
    );
}

#[test]
fn concurrent_submissions_commit_in_stamp_order() {
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 10;

    let cluster = Cluster::new(3);
    let leader = cluster.node(0);

    let mut assigned: Vec<ViewStamp> = cluster.with_replicas_running(|| {
        thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    s.spawn(move || {
                        (0..PER_THREAD)
                            .map(|i| {
                                leader
                                    .submit(Bytes::from(format!("{t}-{i}")), LONG)
                                    .unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        })
    });

    assigned.sort();
    let expected: Vec<_> = (1..=THREADS * PER_THREAD).map(|r| stamp(1, r)).collect();
    assert_eq!(assigned, expected);
    assert_eq!(cluster.outputs[0].stamps(), expected);
    assert_eq!(leader.state().committed, stamp(1, THREADS * PER_THREAD));

    // Followers deliver a contiguous prefix of the same order.
    for output in &cluster.outputs[1..] {
        let delivered = output.stamps();
        assert_eq!(delivered, expected[..delivered.len()]);
    }
}

#[test]
fn shutdown_cancels_waiting_submitter() {
    let cluster = Cluster::new(3);
    cluster.network.isolate(NodeId::new(0));
    let leader = cluster.node(0);

    let result = thread::scope(|s| {
        let handle = s.spawn(|| leader.submit(Bytes::from_static(b"x"), LONG));
        while leader.state().highest_seen != stamp(1, 1) {
            thread::yield_now();
        }
        cluster.shutdown.trigger();
        handle.join().unwrap()
    });

    assert!(matches!(result, Err(SubmitError::Cancelled { .. })));
}

#[test]
fn accept_loop_stops_on_shutdown() {
    let cluster = Cluster::new(2);
    let follower = Arc::clone(cluster.node(1));
    let handle = thread::spawn(move || follower.accept_loop());

    thread::sleep(Duration::from_millis(10));
    cluster.shutdown.trigger();
    handle.join().unwrap();
}

// ============================================================================
// Follower
// ============================================================================

#[test]
fn entry_from_wrong_leader_is_dropped() {
    let f = follower();

    let outcome = f
        .replica
        .process_entry(entry_from(2, stamp(1, 1), stamp(1, 0)));

    assert!(matches!(
        outcome,
        AcceptOutcome::Dropped {
            reason: DropReason::WrongLeader { .. },
            ..
        }
    ));
    assert_eq!(f.replica.state().highest_seen, stamp(1, 0));
    assert!(f.store.is_empty());
    assert!(f.other_link.try_receive_ack().is_none());
    assert_eq!(f.replica.metrics().entries_dropped, 1);
}

#[test]
fn entry_from_older_view_is_dropped() {
    let f = follower();
    assert!(f.replica.on_view_change(View::new(2, NodeId::new(0))));

    let outcome = f
        .replica
        .process_entry(entry_from(0, stamp(1, 3), stamp(1, 2)));

    assert!(matches!(
        outcome,
        AcceptOutcome::Dropped {
            reason: DropReason::StaleView {
                entry_view: 1,
                current_view: 2
            },
            ..
        }
    ));
    assert!(f.store.is_empty());
}

#[test]
fn accepted_entry_is_persisted_then_acked() {
    let f = follower();

    let outcome = f
        .replica
        .process_entry(entry_from(0, stamp(1, 1), stamp(1, 0)));
    assert!(matches!(
        outcome,
        AcceptOutcome::Accepted {
            acked: true,
            delivered: 0,
            ..
        }
    ));

    let record = RequestRecord::decode(&f.store.get(stamp(1, 1).key()).unwrap()).unwrap();
    assert!(record.ack_bitmap.contains(NodeId::new(0)));
    assert!(record.ack_bitmap.contains(NodeId::new(1)));
    assert_eq!(
        f.leader_link.try_receive_ack(),
        Some(AcceptAck::new(NodeId::new(1), stamp(1, 1)))
    );
    assert_eq!(f.replica.state().highest_seen, stamp(1, 1));
}

#[test]
fn commit_hint_delivers_stored_records_in_order() {
    let f = follower();
    let r = &f.replica;

    r.process_entry(entry_from(0, stamp(1, 1), stamp(1, 0)));
    r.process_entry(entry_from(0, stamp(1, 2), stamp(1, 1)));
    r.process_entry(entry_from(0, stamp(1, 3), stamp(1, 2)));
    r.process_entry(entry_from(0, stamp(1, 4), stamp(1, 2)));
    assert_eq!(r.state().committed, stamp(1, 2));
    assert_eq!(f.output.len(), 2);

    let outcome = r.process_entry(entry_from(0, stamp(1, 5), stamp(1, 5)));
    assert!(matches!(outcome, AcceptOutcome::Accepted { delivered: 3, .. }));
    assert_eq!(r.state().committed, stamp(1, 5));
    assert_eq!(
        f.output.stamps()[2..],
        [stamp(1, 3), stamp(1, 4), stamp(1, 5)]
    );
    assert_eq!(
        f.output.delivered()[4].payload,
        Bytes::from(format!("payload {}", stamp(1, 5)))
    );
}

#[test]
fn missing_entry_holds_back_delivery() {
    let f = follower();
    let r = &f.replica;

    r.process_entry(entry_from(0, stamp(1, 1), stamp(1, 0)));
    r.process_entry(entry_from(0, stamp(1, 3), stamp(1, 3)));
    assert_eq!(r.state().committed, stamp(1, 1));
    assert_eq!(f.output.stamps(), vec![stamp(1, 1)]);

    r.process_entry(entry_from(0, stamp(1, 2), stamp(1, 3)));
    assert_eq!(r.state().committed, stamp(1, 3));
    assert_eq!(
        f.output.stamps(),
        vec![stamp(1, 1), stamp(1, 2), stamp(1, 3)]
    );
}

#[test]
fn full_delivery_queue_holds_commit_pointer() {
    let network = MemoryNetwork::new(2, 16, DEFAULT_MAX_MESSAGE_SIZE);
    let queue = Arc::new(QueueDelivery::new(1));
    let replica = Replica::new(
        ClusterConfig::new(NodeId::new(1), 2).unwrap(),
        View::initial(NodeId::new(0)),
        Arc::new(MemoryStore::new()),
        network.channels_for(NodeId::new(1)),
    )
    .unwrap()
    .with_delivery(queue.clone());

    replica.process_entry(entry_from(0, stamp(1, 1), stamp(1, 0)));
    replica.process_entry(entry_from(0, stamp(1, 2), stamp(1, 2)));
    assert_eq!(replica.state().committed, stamp(1, 1));
    assert_eq!(replica.metrics().delivery_failures, 1);

    assert_eq!(queue.drain().len(), 1);
    replica.process_entry(entry_from(0, stamp(1, 3), stamp(1, 2)));
    assert_eq!(replica.state().committed, stamp(1, 2));
}

#[test]
fn follower_persist_failure_sends_no_ack() {
    let network = MemoryNetwork::new(2, 16, DEFAULT_MAX_MESSAGE_SIZE);
    let store = Arc::new(FlakyStore::default());
    let replica = Replica::new(
        ClusterConfig::new(NodeId::new(1), 2).unwrap(),
        View::initial(NodeId::new(0)),
        store.clone(),
        network.channels_for(NodeId::new(1)),
    )
    .unwrap();
    let leader_end = network
        .channels_for(NodeId::new(0))
        .into_iter()
        .next()
        .unwrap();

    store.fail_puts.store(true, Ordering::Release);
    let outcome = replica.process_entry(entry_from(0, stamp(1, 1), stamp(1, 0)));

    assert!(matches!(outcome, AcceptOutcome::Failed { .. }));
    assert_eq!(replica.state().highest_seen, stamp(1, 0));
    assert!(leader_end.try_receive_ack().is_none());
}

// ============================================================================
// Views and recovery
// ============================================================================

#[test]
fn view_change_moves_leadership() {
    let cluster = Cluster::new(3);
    cluster
        .with_replicas_running(|| cluster.node(0).submit(Bytes::from_static(b"v1"), LONG))
        .unwrap();
    cluster.settle();

    let next_view = View::new(2, NodeId::new(1));
    for replica in &cluster.replicas {
        assert!(replica.on_view_change(next_view));
    }

    let new_leader = cluster.node(1);
    assert_eq!(new_leader.state().role, Role::Leader);
    assert_eq!(new_leader.state().highest_seen, stamp(2, 0));
    assert!(matches!(
        cluster.node(0).submit(Bytes::from_static(b"x"), LONG),
        Err(SubmitError::NotLeader { .. })
    ));

    let assigned = cluster
        .with_replicas_running(|| new_leader.submit(Bytes::from_static(b"v2"), LONG))
        .unwrap();
    assert_eq!(assigned, stamp(2, 1));
    assert_eq!(new_leader.metrics().view_id, 2);

    // Older views are ignored.
    assert!(!new_leader.on_view_change(View::initial(NodeId::new(0))));
    assert_eq!(new_leader.state().cur_view, next_view);
}

#[test]
fn view_change_abandons_waiting_requests() {
    let cluster = Cluster::new(3);
    cluster.network.isolate(NodeId::new(0));
    let leader = cluster.node(0);

    let result = thread::scope(|s| {
        let handle = s.spawn(|| leader.submit(Bytes::from_static(b"orphan"), LONG));
        while leader.state().highest_seen != stamp(1, 1) {
            thread::yield_now();
        }
        leader.on_view_change(View::new(2, NodeId::new(1)));
        handle.join().unwrap()
    });

    assert!(matches!(
        result,
        Err(SubmitError::NoQuorum { stamp: s, acks: 1, .. }) if s == stamp(1, 1)
    ));
    assert_eq!(leader.state().role, Role::Secondary);
    assert_eq!(leader.metrics().pending_requests, 0);
}

#[test]
fn recover_resumes_after_last_stored_stamp() {
    let dir = tempfile::tempdir().unwrap();
    let open = || {
        Replica::new(
            ClusterConfig::single_node(),
            View::initial(NodeId::new(0)),
            Arc::new(FileStore::open(dir.path()).unwrap()),
            Vec::new(),
        )
        .unwrap()
        .recover()
        .unwrap()
    };

    {
        let replica = open();
        for payload in ["a", "b", "c"] {
            replica.submit(Bytes::from(payload), LONG).unwrap();
        }
    }

    let replica = open();
    assert_eq!(replica.state().highest_seen, stamp(1, 3));
    assert_eq!(
        replica.submit(Bytes::from_static(b"d"), LONG).unwrap(),
        stamp(1, 4)
    );
}

#[test]
fn mismatched_channels_are_rejected() {
    let network = MemoryNetwork::new(3, 4, DEFAULT_MAX_MESSAGE_SIZE);
    let err = Replica::new(
        ClusterConfig::new(NodeId::new(0), 3).unwrap(),
        View::initial(NodeId::new(0)),
        Arc::new(MemoryStore::new()),
        network.channels_for(NodeId::new(1)),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::ChannelMismatch(_)));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Whatever order entries arrive in, the follower's commit pointer
    /// never moves back and it delivers a gap-free prefix.
    #[test]
    fn follower_delivers_gap_free_prefix(
        order in Just((1u64..=12).collect::<Vec<_>>()).prop_shuffle(),
        lag in proptest::collection::vec(0u64..4, 12),
    ) {
        let f = follower();
        let mut last_committed = f.replica.state().committed;

        for (req, lag) in order.iter().zip(lag) {
            let hint = stamp(1, req.saturating_sub(lag));
            f.replica.process_entry(entry_from(0, stamp(1, *req), hint));

            let committed = f.replica.state().committed;
            prop_assert!(committed >= last_committed);
            prop_assert!(committed <= f.replica.state().highest_seen);
            last_committed = committed;
        }

        let delivered = f.output.stamps();
        let expected: Vec<_> = (1..=delivered.len() as u64).map(|r| stamp(1, r)).collect();
        prop_assert_eq!(&delivered, &expected);
        prop_assert_eq!(delivered.last().copied().unwrap_or(stamp(1, 0)), last_committed);
    }
}
