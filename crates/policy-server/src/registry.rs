//! Process-wide set of live subscriber connections.
//!
//! The registry owns the only outbound sender of every subscriber. Removing a
//! subscriber drops that sender, which closes the queue its session task
//! drains; the session then winds down on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use policy_core::{Notification, SubscriberId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Serialized frame shared by every recipient of one broadcast.
pub type Frame = Arc<str>;

/// Why a frame could not be queued for a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber queue closed")]
    Closed,
}

/// The registry's handle on one subscriber connection.
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Frame>,
    connected_at: Instant,
}

impl Subscriber {
    /// Create a subscriber and its outbound queue.
    ///
    /// The receiver belongs to the session task that writes to the socket. A
    /// slow socket only delays its own queue; frames wait there in order.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Self {
            id: SubscriberId::new(),
            tx,
            connected_at: Instant::now(),
        };
        (subscriber, rx)
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Queue a frame without waiting. Fails only once the session has gone away.
    pub fn try_deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
        self.tx.send(Arc::clone(frame)).map_err(|_| DeliveryError::Closed)
    }
}

/// Outcome of one [`ConnectionRegistry::broadcast`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Registry of all subscribed WebSocket connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<SubscriberId, Subscriber>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Re-registering an id that is already present is a no-op.
    pub fn register(&self, subscriber: Subscriber) {
        let id = subscriber.id.clone();
        let mut connections = self.connections.lock();
        if connections.contains_key(&id) {
            return;
        }
        connections.insert(id.clone(), subscriber);
        let total = connections.len();
        drop(connections);
        debug!(subscriber_id = %id, total, "subscriber registered");
    }

    /// Remove a subscriber if present. Returns whether it was registered.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let removed = self.connections.lock().remove(id);
        match removed {
            Some(subscriber) => {
                debug!(
                    subscriber_id = %id,
                    connected_ms = subscriber.connected_at.elapsed().as_millis() as u64,
                    "subscriber unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Serialize `event` once and queue it for every registered subscriber.
    ///
    /// Each delivery is independent. A subscriber whose queue is closed is
    /// removed inside the same critical section as the iteration, so a
    /// concurrent `register` can never be lost and no pruned subscriber sees
    /// a later broadcast. Delivery failures are never reported to the caller.
    pub fn broadcast(&self, event: &Notification) -> BroadcastReport {
        let frame: Frame = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(
                    event_type = event.kind.as_str(),
                    error = %e,
                    "failed to serialize notification"
                );
                return BroadcastReport::default();
            }
        };
        self.broadcast_frame(&frame)
    }

    /// Fan out an already serialized frame.
    pub fn broadcast_frame(&self, frame: &Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut connections = self.connections.lock();
        connections.retain(|id, subscriber| match subscriber.try_deliver(frame) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(reason) => {
                warn!(subscriber_id = %id, %reason, "delivery failed, pruning subscriber");
                report.pruned += 1;
                false
            }
        });
        drop(connections);

        debug!(
            delivered = report.delivered,
            pruned = report.pruned,
            "broadcast complete"
        );
        report
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.connections.lock().contains_key(id)
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
