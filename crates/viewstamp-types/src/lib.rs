//! # viewstamp-types: Core types for `viewstamp`
//!
//! This crate contains the value types shared by every other crate:
//! - Identity ([`NodeId`], [`MAX_REPLICAS`])
//! - Ordering ([`View`], [`ViewStamp`], [`ViewStampKey`])
//! - Quorum bookkeeping ([`AckBitmap`], [`quorum_size`])
//! - Temporal types ([`Timestamp`])
//!
//! All types are `Copy` and side-effect free.

use std::{
    cmp::Ordering,
    fmt::{Debug, Display},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Node Identifier - Copy (single byte)
// ============================================================================

/// Maximum number of replicas in a group.
///
/// This is the width of [`AckBitmap`]: one bit per replica. Configurations
/// with a larger group are rejected at startup.
pub const MAX_REPLICAS: usize = 64;

/// Identifier of a replica within its group.
///
/// Node ids are dense indices in `0..group_size` and double as the bit
/// position in an [`AckBitmap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u8);

impl NodeId {
    /// Creates a new node id.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `id` is not below [`MAX_REPLICAS`].
    pub fn new(id: u8) -> Self {
        debug_assert!((id as usize) < MAX_REPLICAS, "node id exceeds MAX_REPLICAS");
        Self(id)
    }

    /// Creates a node id, returning `None` if it does not fit in an [`AckBitmap`].
    pub fn try_new(id: u8) -> Option<Self> {
        ((id as usize) < MAX_REPLICAS).then_some(Self(id))
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns the id as a `usize` for indexing.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

// ============================================================================
// ViewStamp - Copy (16-byte logical clock)
// ============================================================================

/// Logical timestamp ordering requests inside a view.
///
/// Ordering is lexicographic on `(view_id, req_id)`; the derived `Ord`
/// relies on the field declaration order.
///
/// # Invariants
///
/// - `req_id` is strictly increasing within a fixed `view_id` on the node
///   that assigns stamps.
/// - Stamps are never mutated in place: [`ViewStamp::next`] returns a new
///   value that the caller stores explicitly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ViewStamp {
    pub view_id: u64,
    pub req_id: u64,
}

impl ViewStamp {
    /// The stamp that precedes every assigned stamp.
    pub const ZERO: ViewStamp = ViewStamp {
        view_id: 0,
        req_id: 0,
    };

    pub fn new(view_id: u64, req_id: u64) -> Self {
        Self { view_id, req_id }
    }

    /// Returns the stamp that precedes the first request of `view_id`.
    pub fn first_in_view(view_id: u64) -> Self {
        Self { view_id, req_id: 0 }
    }

    /// Returns the next stamp in the same view, or `None` once the view
    /// has used every request id.
    #[must_use]
    pub fn checked_next(&self) -> Option<Self> {
        Some(Self {
            view_id: self.view_id,
            req_id: self.req_id.checked_add(1)?,
        })
    }

    /// Returns the next stamp in the same view.
    ///
    /// # Panics
    ///
    /// Panics if `req_id` is `u64::MAX`. Use [`ViewStamp::checked_next`]
    /// for stamps taken from the network.
    #[must_use]
    pub fn next(&self) -> Self {
        self.checked_next()
            .expect("req_id overflow within a single view")
    }

    /// Lexicographic comparison on `(view_id, req_id)`.
    pub fn compare(&self, other: &ViewStamp) -> Ordering {
        self.cmp(other)
    }

    /// Returns true if `other` directly follows `self` within the same view.
    pub fn is_followed_by(&self, other: &ViewStamp) -> bool {
        self.view_id == other.view_id && self.req_id.checked_add(1) == Some(other.req_id)
    }

    /// Packs this stamp into its store key.
    pub fn key(&self) -> ViewStampKey {
        ViewStampKey::from(*self)
    }
}

impl Display for ViewStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.view_id, self.req_id)
    }
}

// ============================================================================
// ViewStampKey - Copy (packed 128-bit store key)
// ============================================================================

/// A [`ViewStamp`] packed into a single integer for use as a store key.
///
/// **Bit Layout**:
/// - Upper 64 bits: `view_id`
/// - Lower 64 bits: `req_id`
///
/// Packing is total and order-preserving, so a key range scan returns
/// records in commit order.
///
/// # Examples
///
/// ```
/// # use viewstamp_types::{ViewStamp, ViewStampKey};
/// let a = ViewStampKey::from(ViewStamp::new(1, u64::MAX));
/// let b = ViewStampKey::from(ViewStamp::new(2, 0));
/// assert!(a < b);
/// assert_eq!(b.stamp(), ViewStamp::new(2, 0));
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ViewStampKey(u128);

impl ViewStampKey {
    /// Size of the persisted key encoding.
    pub const ENCODED_LEN: usize = 16;

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// Unpacks the key back into its stamp.
    pub fn stamp(&self) -> ViewStamp {
        ViewStamp {
            view_id: (self.0 >> 64) as u64,
            req_id: self.0 as u64,
        }
    }

    /// Big-endian encoding; byte order matches key order.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; Self::ENCODED_LEN]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl From<ViewStamp> for ViewStampKey {
    fn from(stamp: ViewStamp) -> Self {
        Self((u128::from(stamp.view_id) << 64) | u128::from(stamp.req_id))
    }
}

impl From<ViewStampKey> for ViewStamp {
    fn from(key: ViewStampKey) -> Self {
        key.stamp()
    }
}

impl Display for ViewStampKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.stamp(), f)
    }
}

// ============================================================================
// View - Copy (cluster epoch)
// ============================================================================

/// Cluster epoch and its leader.
///
/// Views are produced by the external election service; this crate only
/// carries them. `view_id` is monotonically non-decreasing cluster-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct View {
    pub view_id: u64,
    pub leader_id: NodeId,
    pub req_id: u64,
}

impl View {
    pub fn new(view_id: u64, leader_id: NodeId) -> Self {
        Self {
            view_id,
            leader_id,
            req_id: 0,
        }
    }

    /// The view every group starts in: view 1, no requests yet.
    pub fn initial(leader_id: NodeId) -> Self {
        Self::new(1, leader_id)
    }

    pub fn is_leader(&self, node: NodeId) -> bool {
        self.leader_id == node
    }
}

impl Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "view {} (leader {})", self.view_id, self.leader_id)
    }
}

// ============================================================================
// Quorum bookkeeping
// ============================================================================

/// Number of acknowledgments that form a majority of `group_size`.
pub fn quorum_size(group_size: usize) -> usize {
    group_size / 2 + 1
}

/// One bit per replica; bit *i* set means node *i* has acknowledged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
pub struct AckBitmap(u64);

impl AckBitmap {
    pub const EMPTY: AckBitmap = AckBitmap(0);

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns a bitmap with only `node` set.
    pub fn with(node: NodeId) -> Self {
        Self(1u64 << node.as_u8())
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Sets the bit for `node`. Setting an already-set bit is a no-op.
    pub fn set(&mut self, node: NodeId) {
        self.0 |= 1u64 << node.as_u8();
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.0 & (1u64 << node.as_u8()) != 0
    }

    /// Number of acknowledging nodes.
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates over the acknowledging nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..MAX_REPLICAS as u8)
            .map(NodeId)
            .filter(|node| self.contains(*node))
    }
}

impl Display for AckBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

// ============================================================================
// Timestamp - Copy (8-byte value)
// ============================================================================

/// Wall-clock timestamp, nanoseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Creates a timestamp for the current time.
    ///
    /// A clock set before the epoch yields [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        Self(nanos)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{secs}.{nanos:09}")
    }
}
