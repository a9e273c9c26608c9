//! HeartbeatWriter - keeps a connection's heartbeat key alive.
//!
//! `Connection::check` only reads the key. Something has to write it; this
//! task does, every `interval`, with an expiry of `ttl`. When the process
//! dies the key expires and `check` reports `Missing`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{QueueError, QueueResult};
use crate::ports::ListStore;

/// Background heartbeat for one connection.
///
/// - `stop()` ends the task and waits for it.
/// - Dropping the writer also ends the task at its next tick.
pub struct HeartbeatWriter {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl HeartbeatWriter {
    /// Start writing the heartbeat of `conn`.
    ///
    /// `ttl` must be longer than `interval`, otherwise the key lapses between
    /// writes.
    pub fn spawn(conn: &Connection, interval: Duration, ttl: Duration) -> QueueResult<Self> {
        if interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "heartbeat interval must be greater than 0".to_string(),
            ));
        }
        if ttl <= interval {
            return Err(QueueError::InvalidConfig(format!(
                "heartbeat ttl {ttl:?} must exceed interval {interval:?}"
            )));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(heartbeat_loop(
            Arc::clone(conn.store()),
            conn.heartbeat_key().to_string(),
            conn.name().to_string(),
            interval,
            ttl,
            shutdown_rx,
        ));

        Ok(Self { shutdown_tx, join })
    }

    pub async fn stop(self) {
        // ignore send error: the task may already be gone
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "heartbeat task ended abnormally");
        }
    }
}

async fn heartbeat_loop(
    store: Arc<dyn ListStore>,
    key: String,
    connection: String,
    interval: Duration,
    ttl: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match store.set_ex(&key, &connection, ttl).await {
            Ok(()) => debug!(connection = %connection, "heartbeat written"),
            Err(e) => warn!(connection = %connection, error = %e, "heartbeat write failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                // sender dropped: the writer handle is gone
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
