//! shuttle - publish, consume, and settle a queue end to end.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::time::{Instant, sleep};

use shuttle_core::{Connection, Consumer, Delivery, HeartbeatWriter, MemoryStore, QueueStats};

mod args;
mod logging;

use args::Args;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const HEARTBEAT_TTL: Duration = Duration::from_secs(3);

/// Acks every job except every `reject_every`-th one, which it rejects.
struct DemoConsumer {
    reject_every: usize,
    handled: AtomicUsize,
}

impl DemoConsumer {
    fn new(reject_every: usize) -> Self {
        Self {
            reject_every,
            handled: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Consumer for DemoConsumer {
    async fn consume(&self, delivery: Delivery) {
        let n = self.handled.fetch_add(1, Ordering::Relaxed) + 1;
        let reject = self.reject_every > 0 && n % self.reject_every == 0;

        let result = if reject {
            delivery.reject().await
        } else {
            delivery.ack().await
        };

        match result {
            Ok(()) => tracing::info!(
                delivery_id = %delivery.id(),
                payload = delivery.payload(),
                delivered_at = %delivery.delivered_at(),
                rejected = reject,
                "handled"
            ),
            Err(e) => tracing::error!(delivery_id = %delivery.id(), error = %e, "resolve failed"),
        }
    }
}

/// Poll until nothing is waiting or in flight, or `timeout` passes.
async fn wait_until_settled(
    queue: &shuttle_core::Queue,
    poll: Duration,
    timeout: Duration,
) -> anyhow::Result<QueueStats> {
    let deadline = Instant::now() + timeout;
    loop {
        let stats = queue.stats().await?;
        if stats.ready == 0 && stats.unacked == 0 {
            return Ok(stats);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("queue {} did not settle in {:?}: {:?}", queue.name(), timeout, stats);
        }
        sleep(poll).await;
    }
}

fn print_stats(label: &str, stats: &QueueStats) -> anyhow::Result<()> {
    let line = serde_json::json!({ "stage": label, "stats": stats });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.consume_config()?;

    // (A) connection on an in-memory store, with a heartbeat
    let store = Arc::new(MemoryStore::new());
    let conn = Connection::open(&args.tag, store)
        .await
        .context("opening connection")?;
    let heartbeat = HeartbeatWriter::spawn(&conn, HEARTBEAT_INTERVAL, HEARTBEAT_TTL)?;
    tracing::info!(connection = conn.name(), "connected");

    // (B) publish
    let queue = conn.open_queue(&args.queue);
    for i in 1..=args.jobs {
        queue.publish(&format!("job-{i}")).await?;
    }
    print_stats("published", &queue.stats().await?)?;

    // (C) consume until settled
    let consumer = Arc::new(DemoConsumer::new(args.reject_every));
    let handle = queue.start_consuming_with(config.clone(), consumer)?;
    let timeout = Duration::from_secs(args.timeout_secs);
    let stats = wait_until_settled(&queue, config.poll_interval(), timeout).await?;
    print_stats("consumed", &stats)?;

    // (D) optional operator requeue of rejected jobs; the running consumer
    // picks them up again
    if args.return_rejected && stats.rejected > 0 {
        let moved = queue.return_rejected(stats.rejected as usize).await;
        tracing::info!(moved, "returned rejected jobs");
        let stats = wait_until_settled(&queue, config.poll_interval(), timeout).await?;
        print_stats("requeued", &stats)?;
    }

    // (E) shut down
    tokio::select! {
        _ = handle.stop_and_wait() => {}
        _ = tokio::signal::ctrl_c() => tracing::warn!("interrupted while stopping"),
    }
    heartbeat.stop().await;
    tracing::info!(heartbeat = ?conn.check().await?, "done");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init() {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
