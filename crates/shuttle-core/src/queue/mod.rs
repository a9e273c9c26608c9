//! Queue: the delivery protocol mapped onto store lists.
//!
//! State of a payload:
//! - ready -> (poller moves) -> unacked -> (ack) -> removed
//! - unacked -> (reject) -> rejected -> (return_rejected) -> ready
//!
//! Nothing is retried automatically; recovery is an operator calling
//! `return_rejected` / `return_unacked`.

mod delivery;
mod pipeline;

pub use delivery::{Delivery, DeliveryId};
pub use pipeline::ConsumerHandle;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ConsumeConfig;
use crate::error::{QueueError, QueueResult};
use crate::keys::QueueKeys;
use crate::observability::QueueStats;
use crate::ports::{Consumer, ListStore};

struct QueueInner {
    name: String,
    connection: String,
    keys: QueueKeys,
    store: Arc<dyn ListStore>,
    consuming: AtomicBool,
}

/// A named queue bound to a store.
///
/// `Queue` is a cheap handle; clones share the same consuming state. Get one
/// from `Connection::open_queue` so that every caller in the process sees the
/// same instance for a name.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub(crate) fn new(name: &str, connection: &str, store: Arc<dyn ListStore>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                connection: connection.to_string(),
                keys: QueueKeys::for_queue(name),
                store,
                consuming: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.inner.keys
    }

    pub(crate) fn store(&self) -> &Arc<dyn ListStore> {
        &self.inner.store
    }

    /// A pipeline was started on this instance (it may since have stopped).
    pub fn is_consuming(&self) -> bool {
        self.inner.consuming.load(Ordering::SeqCst)
    }

    /// Push a payload onto the head of the ready list.
    pub async fn publish(&self, payload: &str) -> QueueResult<()> {
        self.inner.store.lpush(&self.inner.keys.ready, payload).await?;
        debug!(queue = %self.name(), "published");
        Ok(())
    }

    /// Start the poller and dispatcher with the default prefetch.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_consuming(
        &self,
        poll_interval: Duration,
        consumer: Arc<dyn Consumer>,
    ) -> QueueResult<ConsumerHandle> {
        self.start_consuming_with(ConsumeConfig::new(poll_interval), consumer)
    }

    /// Start the poller and dispatcher.
    ///
    /// One-shot per instance: a second call fails with `AlreadyConsuming`,
    /// even after the first pipeline was stopped. An invalid config is
    /// reported before the instance is marked.
    pub fn start_consuming_with(
        &self,
        config: ConsumeConfig,
        consumer: Arc<dyn Consumer>,
    ) -> QueueResult<ConsumerHandle> {
        config.validate()?;

        if self.inner.consuming.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyConsuming {
                queue: self.name().to_string(),
            });
        }

        info!(
            queue = %self.name(),
            connection = %self.inner.connection,
            poll_interval = ?config.poll_interval,
            prefetch = config.prefetch,
            "started consuming"
        );

        Ok(ConsumerHandle::spawn(
            self.clone(),
            config.poll_interval(),
            config.prefetch,
            consumer,
        ))
    }

    /// Remove one occurrence of `payload` from unacked.
    ///
    /// Fails with `DeliveryNotFound` if unacked holds no such payload.
    pub async fn ack(&self, payload: &str) -> QueueResult<()> {
        let removed = self
            .inner
            .store
            .lrem(&self.inner.keys.unacked, 1, payload)
            .await?;
        if removed == 0 {
            return Err(self.not_found());
        }
        debug!(queue = %self.name(), "acked");
        Ok(())
    }

    /// Move one occurrence of `payload` from unacked to rejected, atomically.
    ///
    /// Fails with `DeliveryNotFound` (and pushes nothing) if unacked holds no
    /// such payload.
    pub async fn reject(&self, payload: &str) -> QueueResult<()> {
        let moved = self
            .inner
            .store
            .lmove_value(&self.inner.keys.unacked, &self.inner.keys.rejected, payload)
            .await?;
        if !moved {
            return Err(self.not_found());
        }
        debug!(queue = %self.name(), "rejected");
        Ok(())
    }

    /// Move up to `count` payloads from rejected back to ready, oldest
    /// rejection first. Returns how many moved.
    pub async fn return_rejected(&self, count: usize) -> usize {
        let keys = &self.inner.keys;
        let moved = self.move_back(&keys.rejected, &keys.ready, count).await;
        info!(queue = %self.name(), moved, "returned rejected payloads");
        moved
    }

    /// Move up to `count` payloads from unacked back to ready, oldest
    /// delivery first. Returns how many moved.
    ///
    /// For recovering payloads left behind by a consumer that died. Running it
    /// while a consumer of this queue is alive hands that consumer's in-flight
    /// payloads out a second time.
    pub async fn return_unacked(&self, count: usize) -> usize {
        let keys = &self.inner.keys;
        let moved = self.move_back(&keys.unacked, &keys.ready, count).await;
        info!(queue = %self.name(), moved, "returned unacked payloads");
        moved
    }

    /// Length of ready; 0 when the store cannot answer.
    pub async fn ready_count(&self) -> u64 {
        self.count_or_zero(&self.inner.keys.ready).await
    }

    /// Length of unacked; 0 when the store cannot answer.
    pub async fn unacked_count(&self) -> u64 {
        self.count_or_zero(&self.inner.keys.unacked).await
    }

    /// Length of rejected; 0 when the store cannot answer.
    pub async fn rejected_count(&self) -> u64 {
        self.count_or_zero(&self.inner.keys.rejected).await
    }

    pub async fn try_ready_count(&self) -> QueueResult<u64> {
        Ok(self.inner.store.llen(&self.inner.keys.ready).await?)
    }

    pub async fn try_unacked_count(&self) -> QueueResult<u64> {
        Ok(self.inner.store.llen(&self.inner.keys.unacked).await?)
    }

    pub async fn try_rejected_count(&self) -> QueueResult<u64> {
        Ok(self.inner.store.llen(&self.inner.keys.rejected).await?)
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            ready: self.try_ready_count().await?,
            unacked: self.try_unacked_count().await?,
            rejected: self.try_rejected_count().await?,
        })
    }

    async fn count_or_zero(&self, list: &str) -> u64 {
        match self.inner.store.llen(list).await {
            Ok(len) => len,
            Err(e) => {
                warn!(queue = %self.name(), list, error = %e, "count failed; reporting 0");
                0
            }
        }
    }

    /// rpoplpush `src` -> `dst` up to `count` times, stopping at the first
    /// empty result or error.
    async fn move_back(&self, src: &str, dst: &str, count: usize) -> usize {
        for moved in 0..count {
            match self.inner.store.rpoplpush(src, dst).await {
                Ok(Some(_)) => {}
                Ok(None) => return moved,
                Err(e) => {
                    warn!(queue = %self.name(), list = src, error = %e, "move stopped early");
                    return moved;
                }
            }
        }
        count
    }

    fn not_found(&self) -> QueueError {
        QueueError::DeliveryNotFound {
            queue: self.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rstest::rstest;
    use tokio::sync::mpsc;

    use super::*;
    use crate::impls::MemoryStore;
    use crate::ports::StoreError;

    const POLL: Duration = Duration::from_millis(10);

    fn setup() -> (Queue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::new("jobs", "test-abc123", store.clone());
        (queue, store)
    }

    /// How the test consumer resolves what it receives.
    #[derive(Clone, Copy)]
    enum Resolve {
        Ack,
        Reject,
        Hold,
    }

    /// Records every payload and resolves it according to `resolve`.
    struct RecordingConsumer {
        resolve: Resolve,
        seen: mpsc::UnboundedSender<String>,
    }

    impl RecordingConsumer {
        fn new(resolve: Resolve) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (seen, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { resolve, seen }), rx)
        }
    }

    #[async_trait]
    impl Consumer for RecordingConsumer {
        async fn consume(&self, delivery: Delivery) {
            match self.resolve {
                Resolve::Ack => delivery.ack().await.unwrap(),
                Resolve::Reject => delivery.reject().await.unwrap(),
                Resolve::Hold => {}
            }
            let _ = self.seen.send(delivery.payload().to_string());
        }
    }

    async fn recv_n(rx: &mut mpsc::UnboundedReceiver<String>, n: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for delivery")
                .expect("consumer dropped");
            out.push(payload);
        }
        out
    }

    #[tokio::test]
    async fn publish_pushes_onto_ready_head() {
        let (queue, store) = setup();
        queue.publish("a").await.unwrap();
        queue.publish("b").await.unwrap();

        assert_eq!(queue.ready_count().await, 2);
        assert_eq!(store.list_contents(&queue.keys().ready).await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn publish_surfaces_store_errors() {
        let (queue, store) = setup();
        store.set_available(false);

        let err = queue.publish("a").await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn ack_and_reject_surface_store_errors_without_moving_anything() {
        let (queue, store) = setup();
        store.lpush(&queue.keys().unacked, "job-1").await.unwrap();
        store.set_available(false);

        let err = queue.ack("job-1").await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Unavailable(_))));
        let err = queue.reject("job-1").await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Unavailable(_))));

        store.set_available(true);
        assert_eq!(store.list_contents(&queue.keys().unacked).await, vec!["job-1"]);
        assert_eq!(queue.rejected_count().await, 0);
        assert_eq!(queue.ready_count().await, 0);
    }

    #[tokio::test]
    async fn consumed_and_acked_payloads_leave_every_list() {
        let (queue, _) = setup();
        let (consumer, mut seen) = RecordingConsumer::new(Resolve::Ack);
        let handle = queue.start_consuming(POLL, consumer).unwrap();

        queue.publish("job-1").await.unwrap();
        queue.publish("job-2").await.unwrap();

        assert_eq!(recv_n(&mut seen, 2).await, vec!["job-1", "job-2"]);
        handle.stop_and_wait().await;

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats, QueueStats::default());
        assert!(stats.is_drained());
    }

    #[tokio::test]
    async fn rejected_payloads_park_in_rejected_and_can_return() {
        let (queue, store) = setup();
        let (consumer, mut seen) = RecordingConsumer::new(Resolve::Reject);
        let handle = queue.start_consuming(POLL, consumer).unwrap();

        queue.publish("job-x").await.unwrap();
        recv_n(&mut seen, 1).await;
        handle.stop_and_wait().await;

        assert_eq!(queue.rejected_count().await, 1);
        assert_eq!(queue.unacked_count().await, 0);
        assert_eq!(queue.ready_count().await, 0);
        assert_eq!(store.list_contents(&queue.keys().rejected).await, vec!["job-x"]);

        assert_eq!(queue.return_rejected(1).await, 1);
        assert_eq!(queue.ready_count().await, 1);
        assert_eq!(queue.rejected_count().await, 0);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(2, 2)]
    #[case(3, 3)]
    #[case(10, 3)]
    #[tokio::test]
    async fn return_rejected_moves_at_most_what_exists(
        #[case] requested: usize,
        #[case] expected: usize,
    ) {
        let (queue, store) = setup();
        // rejected in order r1, r2, r3
        for p in ["r1", "r2", "r3"] {
            store.lpush(&queue.keys().rejected, p).await.unwrap();
        }

        assert_eq!(queue.return_rejected(requested).await, expected);
        assert_eq!(queue.rejected_count().await, (3 - expected) as u64);
        assert_eq!(queue.ready_count().await, expected as u64);
    }

    #[tokio::test]
    async fn return_rejected_preserves_rejection_order() {
        let (queue, store) = setup();
        for p in ["r1", "r2", "r3"] {
            store.lpush(&queue.keys().rejected, p).await.unwrap();
        }
        queue.return_rejected(3).await;

        let mut order = Vec::new();
        while let Some(p) = store
            .rpoplpush(&queue.keys().ready, &queue.keys().unacked)
            .await
            .unwrap()
        {
            order.push(p);
        }
        assert_eq!(order, vec!["r1", "r2", "r3"]);
    }

    #[tokio::test]
    async fn return_rejected_stops_on_store_error() {
        let (queue, store) = setup();
        store.lpush(&queue.keys().rejected, "r1").await.unwrap();
        store.set_available(false);

        assert_eq!(queue.return_rejected(1).await, 0);

        store.set_available(true);
        assert_eq!(queue.rejected_count().await, 1);
    }

    #[tokio::test]
    async fn return_unacked_requeues_stranded_payloads() {
        let (queue, store) = setup();
        store.lpush(&queue.keys().unacked, "stale").await.unwrap();

        assert_eq!(queue.return_unacked(5).await, 1);
        assert_eq!(queue.ready_count().await, 1);
        assert_eq!(queue.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn ack_of_unknown_payload_is_not_found() {
        let (queue, _) = setup();
        let err = queue.ack("ghost").await.unwrap_err();
        assert!(matches!(err, QueueError::DeliveryNotFound { queue } if queue == "jobs"));
    }

    #[tokio::test]
    async fn ack_removes_exactly_one_duplicate() {
        let (queue, store) = setup();
        store.lpush(&queue.keys().unacked, "dup").await.unwrap();
        store.lpush(&queue.keys().unacked, "dup").await.unwrap();

        queue.ack("dup").await.unwrap();
        assert_eq!(queue.unacked_count().await, 1);
    }

    #[tokio::test]
    async fn reject_of_unknown_payload_pushes_nothing() {
        let (queue, _) = setup();
        let err = queue.reject("ghost").await.unwrap_err();
        assert!(matches!(err, QueueError::DeliveryNotFound { .. }));
        assert_eq!(queue.rejected_count().await, 0);
    }

    #[tokio::test]
    async fn counts_report_zero_when_store_fails() {
        let (queue, store) = setup();
        queue.publish("a").await.unwrap();
        store.set_available(false);

        assert_eq!(queue.ready_count().await, 0);
        assert_eq!(queue.unacked_count().await, 0);
        assert_eq!(queue.rejected_count().await, 0);
        assert!(queue.try_ready_count().await.is_err());
        assert!(queue.stats().await.is_err());
    }

    #[tokio::test]
    async fn counts_of_absent_lists_are_zero() {
        let (queue, _) = setup();
        assert_eq!(queue.try_ready_count().await.unwrap(), 0);
        assert_eq!(queue.try_unacked_count().await.unwrap(), 0);
        assert_eq!(queue.try_rejected_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_start_is_already_consuming() {
        let (queue, _) = setup();
        let (first, _seen) = RecordingConsumer::new(Resolve::Ack);
        let (second, mut second_seen) = RecordingConsumer::new(Resolve::Ack);

        let handle = queue.start_consuming(POLL, first).unwrap();
        let err = queue.start_consuming(POLL, second).unwrap_err();
        assert!(matches!(err, QueueError::AlreadyConsuming { queue } if queue == "jobs"));

        // still refused after the first pipeline stopped
        handle.stop_and_wait().await;
        let (third, _) = RecordingConsumer::new(Resolve::Ack);
        assert!(queue.start_consuming(POLL, third).is_err());

        // the refused consumer never received anything
        queue.publish("late").await.unwrap();
        tokio::time::sleep(POLL * 5).await;
        assert!(second_seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_config_does_not_use_up_the_start() {
        let (queue, _) = setup();
        let (consumer, _) = RecordingConsumer::new(Resolve::Ack);

        let err = queue
            .start_consuming(Duration::ZERO, consumer.clone())
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidConfig(_)));
        assert!(!queue.is_consuming());

        let handle = queue.start_consuming(POLL, consumer).unwrap();
        assert!(queue.is_consuming());
        handle.stop_and_wait().await;
    }

    #[tokio::test]
    async fn sub_millisecond_poll_interval_is_accepted() {
        let (queue, _) = setup();
        let (consumer, mut seen) = RecordingConsumer::new(Resolve::Ack);

        let handle = queue
            .start_consuming(Duration::from_micros(500), consumer)
            .unwrap();
        queue.publish("fast").await.unwrap();

        assert_eq!(recv_n(&mut seen, 1).await, vec!["fast"]);
        handle.stop_and_wait().await;
    }

    #[tokio::test]
    async fn prefetch_bounds_unacked() {
        let (queue, _) = setup();
        for i in 0..10 {
            queue.publish(&format!("job-{i}")).await.unwrap();
        }

        // the consumer never returns, so the dispatcher holds one delivery
        struct Stuck;
        #[async_trait]
        impl Consumer for Stuck {
            async fn consume(&self, _delivery: Delivery) {
                std::future::pending::<()>().await;
            }
        }

        let config = ConsumeConfig::new(POLL).with_prefetch(2);
        let _handle = queue.start_consuming_with(config, Arc::new(Stuck)).unwrap();
        tokio::time::sleep(POLL * 20).await;

        // 1 in the consumer + 2 buffered + 1 held by the blocked poller
        assert_eq!(queue.unacked_count().await, 4);
        assert_eq!(queue.ready_count().await, 6);
    }

    #[tokio::test]
    async fn poller_backs_off_through_store_outage() {
        let (queue, store) = setup();
        let (consumer, mut seen) = RecordingConsumer::new(Resolve::Ack);
        queue.publish("after-outage").await.unwrap();

        store.set_available(false);
        let handle = queue.start_consuming(POLL, consumer).unwrap();
        tokio::time::sleep(POLL * 5).await;
        assert!(seen.try_recv().is_err());

        store.set_available(true);
        assert_eq!(recv_n(&mut seen, 1).await, vec!["after-outage"]);
        handle.stop_and_wait().await;
    }

    #[tokio::test]
    async fn stop_drains_buffered_deliveries() {
        let (queue, _) = setup();
        for i in 0..5 {
            queue.publish(&format!("job-{i}")).await.unwrap();
        }

        // the consumer is slow enough that deliveries pile up in the channel
        struct Slow(Mutex<Vec<String>>);
        #[async_trait]
        impl Consumer for Slow {
            async fn consume(&self, delivery: Delivery) {
                tokio::time::sleep(Duration::from_millis(20)).await;
                delivery.ack().await.unwrap();
                self.0.lock().unwrap().push(delivery.payload().to_string());
            }
        }

        let slow = Arc::new(Slow(Mutex::new(Vec::new())));
        let handle = queue.start_consuming(POLL, slow.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.stop_and_wait().await;

        // whatever left ready was resolved; nothing stayed in unacked
        let handled = slow.0.lock().unwrap().len() as u64;
        assert!(handled >= 1);
        assert_eq!(queue.unacked_count().await, 0);
        assert_eq!(queue.ready_count().await, 5 - handled);
    }

    #[tokio::test]
    async fn concurrent_publishers_deliver_each_payload_once() {
        let (queue, _) = setup();
        let (consumer, mut seen) = RecordingConsumer::new(Resolve::Ack);
        let handle = queue.start_consuming(POLL, consumer).unwrap();

        let mut publishers = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            publishers.push(tokio::spawn(async move {
                for i in 0..25 {
                    queue.publish(&format!("p{p}-{i}")).await.unwrap();
                }
            }));
        }
        for publisher in publishers {
            publisher.await.unwrap();
        }

        let received = recv_n(&mut seen, 100).await;
        let unique: HashSet<_> = received.iter().collect();
        assert_eq!(unique.len(), 100);

        handle.stop_and_wait().await;
        assert!(queue.stats().await.unwrap().is_drained());
    }

    #[tokio::test]
    async fn unresolved_deliveries_stay_unacked() {
        let (queue, _) = setup();
        let (consumer, mut seen) = RecordingConsumer::new(Resolve::Hold);
        let handle = queue.start_consuming(POLL, consumer).unwrap();

        queue.publish("held").await.unwrap();
        recv_n(&mut seen, 1).await;
        handle.stop_and_wait().await;

        assert_eq!(queue.unacked_count().await, 1);
        assert_eq!(queue.ready_count().await, 0);
    }
}
