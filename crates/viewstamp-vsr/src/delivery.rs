//! Handoff of committed records to the application.
//!
//! Delivery must not block: the replica calls it while holding its state
//! lock. A full target returns [`DeliveryError::Full`] and the replica
//! offers the same record again later: a secondary on its next commit hint,
//! the leader on its next commit or accept pass. No later record is
//! delivered first.

use std::sync::Mutex;

use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use viewstamp_types::ViewStamp;

use crate::error::DeliveryError;

/// Consumer of committed records, called once per record in stamp order.
pub trait Delivery: Send + Sync {
    fn deliver(&self, stamp: ViewStamp, payload: Bytes) -> Result<(), DeliveryError>;
}

/// A committed record as handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub stamp: ViewStamp,
    pub payload: Bytes,
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDelivery;

impl Delivery for NullDelivery {
    fn deliver(&self, _stamp: ViewStamp, _payload: Bytes) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// A bounded queue drained by an application thread.
#[derive(Debug)]
pub struct QueueDelivery {
    queue: ArrayQueue<Delivered>,
}

impl QueueDelivery {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "delivery capacity must be positive");
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    pub fn try_pop(&self) -> Option<Delivered> {
        self.queue.pop()
    }

    /// Pops everything currently queued.
    pub fn drain(&self) -> Vec<Delivered> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Delivery for QueueDelivery {
    fn deliver(&self, stamp: ViewStamp, payload: Bytes) -> Result<(), DeliveryError> {
        self.queue
            .push(Delivered { stamp, payload })
            .map_err(|rejected| DeliveryError::Full {
                stamp: rejected.stamp,
            })
    }
}

/// Keeps every delivered record. Used by tests and the demo.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    delivered: Mutex<Vec<Delivered>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().expect("lock poisoned").clone()
    }

    pub fn stamps(&self) -> Vec<ViewStamp> {
        self.delivered
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|d| d.stamp)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Delivery for RecordingDelivery {
    fn deliver(&self, stamp: ViewStamp, payload: Bytes) -> Result<(), DeliveryError> {
        self.delivered
            .lock()
            .expect("lock poisoned")
            .push(Delivered { stamp, payload });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_reports_full_with_rejected_stamp() {
        let queue = QueueDelivery::new(1);
        queue.deliver(ViewStamp::new(1, 1), Bytes::new()).unwrap();
        assert_eq!(
            queue.deliver(ViewStamp::new(1, 2), Bytes::new()),
            Err(DeliveryError::Full {
                stamp: ViewStamp::new(1, 2)
            })
        );

        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
        queue.deliver(ViewStamp::new(1, 2), Bytes::new()).unwrap();
    }

    #[test]
    fn recording_keeps_order() {
        let recorder = RecordingDelivery::new();
        for req in 1..=3 {
            recorder
                .deliver(ViewStamp::new(1, req), Bytes::from_static(b"x"))
                .unwrap();
        }
        assert_eq!(
            recorder.stamps(),
            vec![
                ViewStamp::new(1, 1),
                ViewStamp::new(1, 2),
                ViewStamp::new(1, 3)
            ]
        );
    }
}
