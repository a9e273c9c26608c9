//! Connection: a named client of the store that hands out queues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info};

use crate::error::QueueResult;
use crate::keys::heartbeat_key;
use crate::ports::{KeyTtl, ListStore};
use crate::queue::Queue;

const NAME_SUFFIX_LEN: usize = 6;

/// What the heartbeat key of a connection currently says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// Nobody has written the key, or it expired.
    Missing,

    /// The key exists and expires after the given duration.
    Alive { expires_in: Duration },

    /// The key exists without an expiry.
    Persistent,
}

impl HeartbeatStatus {
    pub fn is_alive(self) -> bool {
        !matches!(self, HeartbeatStatus::Missing)
    }
}

impl From<KeyTtl> for HeartbeatStatus {
    fn from(ttl: KeyTtl) -> Self {
        match ttl {
            KeyTtl::Missing => HeartbeatStatus::Missing,
            KeyTtl::Persistent => HeartbeatStatus::Persistent,
            KeyTtl::Expires(expires_in) => HeartbeatStatus::Alive { expires_in },
        }
    }
}

/// A logical client instance.
///
/// # 設計原則
/// - 名前は `{tag}-{英数字6文字}`、インスタンスごとに新しく生成
/// - queue の HashMap はプロセス内キャッシュにすぎず、中身は store 側にある
/// - 同じ名前の `open_queue` は同じ `Queue` を返すので、consume の一回限りガードが呼び出し側をまたいで効く
pub struct Connection {
    name: String,
    heartbeat_key: String,
    store: Arc<dyn ListStore>,
    queues: Mutex<HashMap<String, Queue>>,
}

impl Connection {
    /// Build a connection without touching the store.
    pub fn new(tag: &str, store: Arc<dyn ListStore>) -> Self {
        let name = format!("{tag}-{}", random_suffix());
        Self {
            heartbeat_key: heartbeat_key(&name),
            name,
            store,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Build a connection and make sure the store answers.
    pub async fn open(tag: &str, store: Arc<dyn ListStore>) -> QueueResult<Self> {
        let conn = Self::new(tag, store);
        let status = conn.check().await?;
        info!(connection = %conn.name, heartbeat = ?status, "connection opened");
        Ok(conn)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn heartbeat_key(&self) -> &str {
        &self.heartbeat_key
    }

    pub fn store(&self) -> &Arc<dyn ListStore> {
        &self.store
    }

    /// Get the queue called `name`, creating the handle on first use.
    ///
    /// No store keys are created here; lists appear on first publish.
    pub fn open_queue(&self, name: &str) -> Queue {
        let mut queues = self
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(connection = %self.name, queue = name, "opened queue");
                Queue::new(name, &self.name, Arc::clone(&self.store))
            })
            .clone()
    }

    /// Names of the queues opened through this connection.
    pub fn queue_names(&self) -> Vec<String> {
        let queues = self
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Read this connection's heartbeat key.
    ///
    /// A missing key is a status, not an error; only a store failure fails.
    pub async fn check(&self) -> QueueResult<HeartbeatStatus> {
        let ttl = self.store.ttl(&self.heartbeat_key).await?;
        Ok(ttl.into())
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NAME_SUFFIX_LEN)
        .map(char::from)
        .collect()
}
