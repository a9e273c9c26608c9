//! Command line arguments.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use shuttle_core::ConsumeConfig;

/// Run a publish/consume round trip against an in-memory list store.
#[derive(Debug, Parser)]
#[command(name = "shuttle", version)]
pub struct Args {
    /// Tag used as the connection name prefix
    #[arg(long, env = "SHUTTLE_TAG", default_value = "shuttle")]
    pub tag: String,

    /// Queue to publish to and consume from
    #[arg(long, env = "SHUTTLE_QUEUE", default_value = "jobs")]
    pub queue: String,

    /// Number of jobs to publish
    #[arg(long, default_value_t = 10)]
    pub jobs: usize,

    /// Reject every n-th job (0 = never)
    #[arg(long, default_value_t = 0)]
    pub reject_every: usize,

    /// Move rejected jobs back to ready once the queue has settled
    #[arg(long)]
    pub return_rejected: bool,

    /// JSON file with a consume config ({ "poll_interval_ms": .., "prefetch": .. })
    #[arg(long, env = "SHUTTLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Poll interval in milliseconds (overrides the config file)
    #[arg(long, env = "SHUTTLE_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Delivery channel capacity (overrides the config file)
    #[arg(long, env = "SHUTTLE_PREFETCH")]
    pub prefetch: Option<usize>,

    /// Give up waiting for the queue to settle after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl Args {
    /// Config file values (or defaults), then command line overrides.
    pub fn consume_config(&self) -> anyhow::Result<ConsumeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => ConsumeConfig::default(),
        };

        if let Some(poll_interval_ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(poll_interval_ms);
        }
        if let Some(prefetch) = self.prefetch {
            config.prefetch = prefetch;
        }

        config.validate()?;
        tracing::debug!(?config, "consume config resolved");
        Ok(config)
    }
}
