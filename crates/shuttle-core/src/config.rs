//! Consumption settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

/// Default capacity of the channel between poller and dispatcher.
pub const DEFAULT_PREFETCH: usize = 16;

/// Default pause between polls when the ready list is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Settings for one consuming queue.
///
/// `prefetch` bounds how many deliveries can sit in the channel waiting for
/// the dispatcher, and so how many payloads one consumer holds in unacked.
///
/// On disk the interval is `poll_interval_ms`, a number of milliseconds that
/// may be fractional (`0.5` is 500µs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumeConfig {
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    pub prefetch: usize,
}

impl ConsumeConfig {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..Self::default()
        }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.poll_interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "poll interval must be greater than 0".to_string(),
            ));
        }
        if self.prefetch == 0 {
            return Err(QueueError::InvalidConfig(
                "prefetch must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ConsumeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

/// `Duration` as fractional milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_nanos() as f64 / 1e6)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(D::Error::custom(format!(
                "poll_interval_ms must be a non-negative number, got {ms}"
            )));
        }
        Ok(Duration::from_nanos((ms * 1e6).round() as u64))
    }
}
