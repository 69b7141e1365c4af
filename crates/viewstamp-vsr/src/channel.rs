//! Peer links.
//!
//! The replica talks to each peer through one [`Channel`]. A channel is
//! non-blocking in both directions: sends fail fast with
//! [`ChannelError::Full`] or [`ChannelError::Disconnected`], and receives
//! return `None` when nothing is waiting. Frames that fail to decode are
//! logged and dropped by the channel; the replica never sees them.
//!
//! [`MemoryNetwork`] wires a whole group together in one process. Each
//! directed link is a pair of bounded rings (entries and acks) carrying
//! encoded frames, so every message crosses the real wire codec.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use tracing::{trace, warn};
use viewstamp_types::NodeId;

use crate::error::ChannelError;
use crate::message::{AcceptAck, LogEntry};

/// A bidirectional, non-blocking link to one peer.
pub trait Channel: Send + Sync + Debug {
    /// The node at the far end of this link.
    fn peer(&self) -> NodeId;

    fn send_entry(&self, entry: &LogEntry) -> Result<(), ChannelError>;

    fn send_ack(&self, ack: &AcceptAck) -> Result<(), ChannelError>;

    /// Next well-formed entry from the peer, if any.
    fn try_receive_entry(&self) -> Option<LogEntry>;

    /// Next well-formed ack from the peer, if any.
    fn try_receive_ack(&self) -> Option<AcceptAck>;
}

// ============================================================================
// In-memory mesh
// ============================================================================

/// One direction of a link between two nodes.
#[derive(Debug)]
struct Link {
    entries: ArrayQueue<Bytes>,
    acks: ArrayQueue<Bytes>,
    connected: AtomicBool,
}

impl Link {
    fn new(capacity: usize) -> Self {
        Self {
            entries: ArrayQueue::new(capacity),
            acks: ArrayQueue::new(capacity),
            connected: AtomicBool::new(true),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Disconnecting also drops frames already in flight.
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        if !connected {
            while self.entries.pop().is_some() {}
            while self.acks.pop().is_some() {}
        }
    }
}

/// A fully connected in-process network for a group of replicas.
#[derive(Debug)]
pub struct MemoryNetwork {
    group_size: usize,
    max_message_size: usize,
    // Directed links, indexed `from * group_size + to`. Self-links are `None`.
    links: Vec<Option<Arc<Link>>>,
}

impl MemoryNetwork {
    /// Builds a mesh for `group_size` nodes with `capacity` frames per ring.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(group_size: usize, capacity: usize, max_message_size: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        let links = (0..group_size * group_size)
            .map(|i| (i / group_size != i % group_size).then(|| Arc::new(Link::new(capacity))))
            .collect();
        Self {
            group_size,
            max_message_size,
            links,
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Channels from `node` to every other node, ascending by peer id.
    pub fn channels_for(&self, node: NodeId) -> Vec<Arc<dyn Channel>> {
        (0..self.group_size)
            .filter(|peer| *peer != node.as_usize())
            .filter_map(|peer| {
                let peer = NodeId::new(peer as u8);
                Some(Arc::new(MemoryChannel {
                    local: node,
                    peer,
                    outbound: Arc::clone(self.link(node, peer)?),
                    inbound: Arc::clone(self.link(peer, node)?),
                    max_message_size: self.max_message_size,
                }) as Arc<dyn Channel>)
            })
            .collect()
    }

    /// Cuts both directions between `a` and `b`.
    pub fn disconnect(&self, a: NodeId, b: NodeId) {
        self.set_connected(a, b, false);
    }

    /// Restores both directions between `a` and `b`.
    pub fn connect(&self, a: NodeId, b: NodeId) {
        self.set_connected(a, b, true);
    }

    /// Cuts every link touching `node`.
    pub fn isolate(&self, node: NodeId) {
        for peer in 0..self.group_size as u8 {
            let peer = NodeId::new(peer);
            if peer != node {
                self.disconnect(node, peer);
            }
        }
    }

    /// Reconnects every link.
    pub fn heal(&self) {
        for link in self.links.iter().flatten() {
            link.set_connected(true);
        }
    }

    fn set_connected(&self, a: NodeId, b: NodeId, connected: bool) {
        for (from, to) in [(a, b), (b, a)] {
            if let Some(link) = self.link(from, to) {
                link.set_connected(connected);
            }
        }
    }

    fn link(&self, from: NodeId, to: NodeId) -> Option<&Arc<Link>> {
        if from.as_usize() >= self.group_size || to.as_usize() >= self.group_size {
            return None;
        }
        self.links
            .get(from.as_usize() * self.group_size + to.as_usize())?
            .as_ref()
    }
}

/// One node's end of a [`MemoryNetwork`] link.
#[derive(Debug)]
pub struct MemoryChannel {
    local: NodeId,
    peer: NodeId,
    outbound: Arc<Link>,
    inbound: Arc<Link>,
    max_message_size: usize,
}

impl MemoryChannel {
    fn push(&self, ring: &ArrayQueue<Bytes>, frame: Bytes) -> Result<(), ChannelError> {
        if frame.len() > self.max_message_size {
            return Err(ChannelError::MessageTooLarge {
                size: frame.len(),
                max: self.max_message_size,
            });
        }
        if !self.outbound.is_connected() {
            return Err(ChannelError::Disconnected { peer: self.peer });
        }
        ring.push(frame)
            .map_err(|_| ChannelError::Full { peer: self.peer })
    }
}

impl Channel for MemoryChannel {
    fn peer(&self) -> NodeId {
        self.peer
    }

    fn send_entry(&self, entry: &LogEntry) -> Result<(), ChannelError> {
        self.push(&self.outbound.entries, entry.to_bytes())?;
        trace!(from = %self.local, to = %self.peer, stamp = %entry.stamp, "entry queued");
        Ok(())
    }

    fn send_ack(&self, ack: &AcceptAck) -> Result<(), ChannelError> {
        self.push(&self.outbound.acks, ack.to_bytes())
    }

    fn try_receive_entry(&self) -> Option<LogEntry> {
        while let Some(frame) = self.inbound.entries.pop() {
            match LogEntry::decode(&frame, self.max_message_size) {
                Ok(entry) => return Some(entry),
                Err(e) => warn!(
                    node = %self.local,
                    peer = %self.peer,
                    error = %e,
                    "dropping undecodable entry"
                ),
            }
        }
        None
    }

    fn try_receive_ack(&self) -> Option<AcceptAck> {
        while let Some(frame) = self.inbound.acks.pop() {
            match AcceptAck::decode(&frame) {
                Ok(ack) => return Some(ack),
                Err(e) => warn!(
                    node = %self.local,
                    peer = %self.peer,
                    error = %e,
                    "dropping undecodable ack"
                ),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use viewstamp_types::ViewStamp;

    use super::*;
    use crate::message::DEFAULT_MAX_MESSAGE_SIZE;

    fn entry(req: u64) -> LogEntry {
        LogEntry::encode(
            NodeId::new(0),
            ViewStamp::new(1, req - 1),
            ViewStamp::new(1, req),
            Bytes::from(format!("req-{req}")),
            DEFAULT_MAX_MESSAGE_SIZE,
        )
        .unwrap()
    }

    fn channel(net: &MemoryNetwork, from: u8, to: u8) -> Arc<dyn Channel> {
        net.channels_for(NodeId::new(from))
            .into_iter()
            .find(|c| c.peer() == NodeId::new(to))
            .unwrap()
    }

    #[test]
    fn channels_cover_every_peer() {
        let net = MemoryNetwork::new(4, 8, DEFAULT_MAX_MESSAGE_SIZE);
        let peers: Vec<_> = net
            .channels_for(NodeId::new(2))
            .iter()
            .map(|c| c.peer().as_u8())
            .collect();
        assert_eq!(peers, vec![0, 1, 3]);
    }

    #[test]
    fn entries_arrive_in_order() {
        let net = MemoryNetwork::new(2, 8, DEFAULT_MAX_MESSAGE_SIZE);
        let leader = channel(&net, 0, 1);
        let follower = channel(&net, 1, 0);

        for req in 1..=3 {
            leader.send_entry(&entry(req)).unwrap();
        }
        let received: Vec<_> = std::iter::from_fn(|| follower.try_receive_entry())
            .map(|e| e.stamp.req_id)
            .collect();
        assert_eq!(received, vec![1, 2, 3]);
        assert!(leader.try_receive_entry().is_none());
    }

    #[test]
    fn acks_travel_back() {
        let net = MemoryNetwork::new(2, 8, DEFAULT_MAX_MESSAGE_SIZE);
        let ack = AcceptAck::new(NodeId::new(1), ViewStamp::new(1, 1));
        channel(&net, 1, 0).send_ack(&ack).unwrap();
        assert_eq!(channel(&net, 0, 1).try_receive_ack(), Some(ack));
    }

    #[test]
    fn full_ring_reports_full() {
        let net = MemoryNetwork::new(2, 1, DEFAULT_MAX_MESSAGE_SIZE);
        let leader = channel(&net, 0, 1);
        leader.send_entry(&entry(1)).unwrap();
        assert_eq!(
            leader.send_entry(&entry(2)),
            Err(ChannelError::Full {
                peer: NodeId::new(1)
            })
        );
    }

    #[test]
    fn disconnect_blocks_both_directions_until_connect() {
        let net = MemoryNetwork::new(3, 8, DEFAULT_MAX_MESSAGE_SIZE);
        net.disconnect(NodeId::new(0), NodeId::new(2));

        assert!(matches!(
            channel(&net, 0, 2).send_entry(&entry(1)),
            Err(ChannelError::Disconnected { .. })
        ));
        assert!(matches!(
            channel(&net, 2, 0).send_ack(&AcceptAck::new(NodeId::new(2), ViewStamp::new(1, 1))),
            Err(ChannelError::Disconnected { .. })
        ));
        channel(&net, 0, 1).send_entry(&entry(1)).unwrap();

        net.connect(NodeId::new(0), NodeId::new(2));
        channel(&net, 0, 2).send_entry(&entry(1)).unwrap();
    }

    #[test]
    fn isolate_then_heal() {
        let net = MemoryNetwork::new(3, 8, DEFAULT_MAX_MESSAGE_SIZE);
        net.isolate(NodeId::new(1));
        assert!(channel(&net, 0, 1).send_entry(&entry(1)).is_err());
        assert!(channel(&net, 2, 1).send_entry(&entry(1)).is_err());
        channel(&net, 0, 2).send_entry(&entry(1)).unwrap();

        net.heal();
        channel(&net, 0, 1).send_entry(&entry(1)).unwrap();
    }

    #[test]
    fn oversized_frame_is_refused() {
        let net = MemoryNetwork::new(2, 8, 64);
        let big = LogEntry {
            origin: NodeId::new(0),
            committed_hint: ViewStamp::ZERO,
            stamp: ViewStamp::new(1, 1),
            payload: Bytes::from(vec![7u8; 128]),
        };
        assert!(matches!(
            channel(&net, 0, 1).send_entry(&big),
            Err(ChannelError::MessageTooLarge { .. })
        ));
    }
}
