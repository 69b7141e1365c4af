//! # viewstamp-vsr: Viewstamped primary-backup replication
//!
//! This crate is the consensus core of viewstamp. A group of replicas
//! agrees on a single order of client requests: the leader of the current
//! view stamps each request, persists it, sends it to every follower and
//! reports success once a majority holds it durably. Followers persist,
//! acknowledge, and deliver records once the leader's commit hint shows
//! they are committed.
//!
//! Leader election is not part of this crate. An external service decides
//! views and announces them through [`Replica::on_view_change`].
//!
//! # Modules
//!
//! - [`replica`]: the [`Replica`] state machine (submit, accept, deliver)
//! - [`message`]: [`LogEntry`] and [`AcceptAck`] and their wire format
//! - [`record`]: the [`RequestRecord`] stored under each stamp
//! - [`quorum`]: acknowledgment tracking
//! - [`channel`]: the [`Channel`] trait and the in-process [`MemoryNetwork`]
//! - [`delivery`]: handoff of committed records to the application
//! - [`config`]: group membership, limits and timeouts
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use viewstamp_storage::MemoryStore;
//! use viewstamp_types::View;
//! use viewstamp_vsr::{ClusterConfig, Replica};
//!
//! let config = ClusterConfig::single_node();
//! let view = View::initial(config.node_id());
//! let replica = Replica::new(config, view, Arc::new(MemoryStore::new()), Vec::new())?;
//!
//! let stamp = replica.submit("solo".into(), Duration::from_secs(1))?;
//! assert_eq!(replica.state().committed, stamp);
//! ```

pub mod channel;
pub mod config;
pub mod delivery;
pub mod error;
pub mod instrumentation;
pub mod message;
pub mod quorum;
pub mod record;
pub mod replica;
pub mod shutdown;

pub use channel::{Channel, MemoryChannel, MemoryNetwork};
pub use config::{ClusterConfig, TimeoutConfig};
pub use delivery::{Delivered, Delivery, NullDelivery, QueueDelivery, RecordingDelivery};
pub use error::{ChannelError, CodecError, ConfigError, DeliveryError, SubmitError};
pub use instrumentation::{Metrics, MetricsSnapshot};
pub use message::{
    ACK_SIZE, AcceptAck, DEFAULT_MAX_MESSAGE_SIZE, ENTRY_HEADER_SIZE, LogEntry,
};
pub use quorum::{QuorumTracker, has_quorum};
pub use record::{RECORD_OVERHEAD, RequestRecord};
pub use replica::{AcceptOutcome, ConsensusState, DropReason, Replica, Role};
pub use shutdown::Shutdown;

#[cfg(test)]
mod tests;
