//! Consumption pipeline: poller and dispatcher tasks.
//!
//! ```text
//! ready --(rpoplpush)--> unacked
//!            |
//!         poller --[bounded mpsc]--> dispatcher --> Consumer::consume
//! ```
//!
//! # 学習ポイント
//! - bounded mpsc によるバックプレッシャー（満杯なら poller が待つ）
//! - watch チャネルで停止を通知し、`select!` で sleep と競わせる
//! - 停止後もチャネルに残った配送は dispatcher が処理してから終了する

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Delivery, Queue};
use crate::ports::Consumer;

/// Handle to a running consumption pipeline.
///
/// - `stop()` stops the poller; deliveries already in the channel are still
///   dispatched, then the dispatcher exits.
/// - `wait()` waits for both tasks.
/// - Dropping the handle without `stop()` leaves the pipeline running for the
///   life of the runtime.
#[derive(Debug)]
pub struct ConsumerHandle {
    queue: String,
    shutdown_tx: watch::Sender<bool>,
    poller: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl ConsumerHandle {
    pub(crate) fn spawn(
        queue: Queue,
        poll_interval: Duration,
        prefetch: usize,
        consumer: Arc<dyn Consumer>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (delivery_tx, delivery_rx) = mpsc::channel(prefetch);
        let name = queue.name().to_string();

        let poller = tokio::spawn(poll_loop(queue, poll_interval, delivery_tx, shutdown_rx));
        let dispatcher = tokio::spawn(dispatch_loop(name.clone(), consumer, delivery_rx));

        Self {
            queue: name,
            shutdown_tx,
            poller,
            dispatcher,
        }
    }

    /// Ask the poller to stop taking new payloads.
    pub fn stop(&self) {
        // ignore send error: the poller may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the poller and the dispatcher to exit.
    ///
    /// Without a prior `stop()` this only returns if a task dies.
    pub async fn wait(self) {
        if let Err(e) = self.poller.await {
            warn!(queue = %self.queue, error = %e, "poller task ended abnormally");
        }
        if let Err(e) = self.dispatcher.await {
            warn!(queue = %self.queue, error = %e, "dispatcher task ended abnormally");
        }
        info!(queue = %self.queue, "stopped consuming");
    }

    pub async fn stop_and_wait(self) {
        self.stop();
        self.wait().await;
    }
}

/// Move payloads ready -> unacked and feed them to the dispatcher.
///
/// An empty ready list and a store error take the same path: sleep for
/// `poll_interval`, then try again. A payload that was moved is always sent
/// on, even while stopping, so nothing is stranded in unacked by this loop.
async fn poll_loop(
    queue: Queue,
    poll_interval: Duration,
    delivery_tx: mpsc::Sender<Delivery>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut shutdown_rx = Some(shutdown_rx);
    let keys = queue.keys().clone();

    while !stop_requested(&shutdown_rx) {
        match queue.store().rpoplpush(&keys.ready, &keys.unacked).await {
            Ok(Some(payload)) => {
                let delivery = Delivery::new(payload, queue.clone());
                debug!(queue = %queue.name(), delivery_id = %delivery.id(), "moved payload to unacked");

                // blocks while the channel is full
                if delivery_tx.send(delivery).await.is_err() {
                    warn!(queue = %queue.name(), "dispatcher is gone; poller exiting");
                    return;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(queue = %queue.name(), error = %e, "poll failed; backing off");
            }
        }

        sleep_or_stop(poll_interval, &mut shutdown_rx).await;
    }

    debug!(queue = %queue.name(), "poller stopped");
}

/// Hand each delivery to the consumer, one at a time, until the channel
/// closes.
async fn dispatch_loop(
    queue: String,
    consumer: Arc<dyn Consumer>,
    mut delivery_rx: mpsc::Receiver<Delivery>,
) {
    while let Some(delivery) = delivery_rx.recv().await {
        debug!(queue = %queue, delivery_id = %delivery.id(), "dispatching");
        consumer.consume(delivery).await;
    }
    debug!(queue = %queue, "dispatcher stopped");
}

fn stop_requested(shutdown_rx: &Option<watch::Receiver<bool>>) -> bool {
    shutdown_rx.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Sleep for `interval`, waking early when a stop is requested.
///
/// If the handle was dropped the pipeline is detached: the receiver is
/// discarded and later pauses are plain sleeps.
async fn sleep_or_stop(interval: Duration, shutdown_rx: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown_rx else {
        tokio::time::sleep(interval).await;
        return;
    };

    let detached = tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        changed = rx.changed() => changed.is_err(),
    };
    if detached {
        *shutdown_rx = None;
    }
}
