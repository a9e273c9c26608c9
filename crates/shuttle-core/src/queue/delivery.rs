//! Delivery - one payload handed to a consumer.

use std::fmt;

use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::Queue;
use crate::error::QueueResult;

/// Process-local id of a delivery, used to correlate log lines.
///
/// It is never written to the store: ack and reject match the unacked list
/// by payload value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryId(Ulid);

impl DeliveryId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery-{}", self.0)
    }
}

/// A payload that currently sits in its queue's unacked list.
///
/// Design intent:
/// - Plain value: cloning is cheap and all clones resolve the same payload.
/// - `ack` / `reject` delegate to the owning `Queue`.
/// - Matching is by value. Two in-flight deliveries with equal payloads are
///   interchangeable; acking one removes one equal entry, whichever it is.
#[derive(Clone)]
pub struct Delivery {
    id: DeliveryId,
    payload: String,
    delivered_at: DateTime<Utc>,
    queue: Queue,
}

impl Delivery {
    pub(crate) fn new(payload: String, queue: Queue) -> Self {
        Self {
            id: DeliveryId::generate(),
            payload,
            delivered_at: Utc::now(),
            queue,
        }
    }

    pub fn id(&self) -> DeliveryId {
        self.id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// When the poller moved this payload into unacked.
    pub fn delivered_at(&self) -> DateTime<Utc> {
        self.delivered_at
    }

    /// Remove the payload from unacked.
    pub async fn ack(&self) -> QueueResult<()> {
        self.queue.ack(&self.payload).await
    }

    /// Move the payload from unacked to rejected.
    pub async fn reject(&self) -> QueueResult<()> {
        self.queue.reject(&self.payload).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("queue", &self.queue.name())
            .field("payload", &self.payload)
            .field("delivered_at", &self.delivered_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::QueueError;
    use crate::impls::MemoryStore;
    use crate::ports::ListStore;

    fn queue_with_store() -> (Queue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::new("mail", "test-abc123", store.clone());
        (queue, store)
    }

    #[tokio::test]
    async fn delivery_exposes_payload_and_queue() {
        let (queue, _) = queue_with_store();
        let before = Utc::now();
        let delivery = Delivery::new("hello".to_string(), queue);

        assert!(delivery.delivered_at() >= before);
        assert!(delivery.delivered_at() <= Utc::now());
        assert_eq!(delivery.clone().delivered_at(), delivery.delivered_at());
        assert_eq!(delivery.payload(), "hello");
        assert_eq!(delivery.queue_name(), "mail");
        assert!(delivery.id().to_string().starts_with("delivery-"));
    }

    #[tokio::test]
    async fn ack_delegates_to_queue() {
        let (queue, store) = queue_with_store();
        store.lpush(&queue.keys().unacked, "hello").await.unwrap();

        let delivery = Delivery::new("hello".to_string(), queue.clone());
        delivery.ack().await.unwrap();
        assert_eq!(queue.unacked_count().await, 0);

        // a clone refers to the same, now resolved, payload
        let err = delivery.clone().ack().await.unwrap_err();
        assert!(matches!(err, QueueError::DeliveryNotFound { .. }));
    }

    #[tokio::test]
    async fn reject_delegates_to_queue() {
        let (queue, store) = queue_with_store();
        store.lpush(&queue.keys().unacked, "hello").await.unwrap();

        Delivery::new("hello".to_string(), queue.clone())
            .reject()
            .await
            .unwrap();
        assert_eq!(queue.unacked_count().await, 0);
        assert_eq!(queue.rejected_count().await, 1);
    }

    #[test]
    fn delivery_ids_are_unique() {
        assert_ne!(DeliveryId::generate(), DeliveryId::generate());
    }
}
