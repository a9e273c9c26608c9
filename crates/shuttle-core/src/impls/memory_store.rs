//! MemoryStore - an in-process ListStore with Redis list semantics.
//!
//! - Lists are `VecDeque`s; the head ("left") is the front.
//! - A list that becomes empty is deleted, so its length reads as 0.
//! - String keys carry an optional expiry checked on access.
//! - `set_available(false)` makes every call fail, to simulate an outage.
//!
//! # 学習ポイント
//! - `tokio::sync::Mutex` で状態全体を1つのロックに閉じ込め、各操作をアトミックにする
//! - `tokio::time::Instant` を使うので、`start_paused` のテストで期限切れを再現できる

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::{KeyTtl, ListStore, StoreError};

enum Entry {
    List(VecDeque<String>),
    Str {
        value: String,
        expires_at: Option<Instant>,
    },
}

#[derive(Default)]
struct MemoryState {
    keys: HashMap<String, Entry>,
}

impl MemoryState {
    /// Drop `key` if it is a string whose expiry has passed.
    fn purge_expired(&mut self, key: &str) {
        let expired = matches!(
            self.keys.get(key),
            Some(Entry::Str { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            self.keys.remove(key);
        }
    }

    fn list(&mut self, key: &str) -> Result<Option<&mut VecDeque<String>>, StoreError> {
        self.purge_expired(key);
        match self.keys.get_mut(key) {
            None => Ok(None),
            Some(Entry::List(list)) => Ok(Some(list)),
            Some(Entry::Str { .. }) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    fn list_or_create(&mut self, key: &str) -> Result<&mut VecDeque<String>, StoreError> {
        self.purge_expired(key);
        let entry = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(list) => Ok(list),
            Entry::Str { .. } => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    /// Delete `key` if it is an empty list.
    fn drop_if_empty(&mut self, key: &str) {
        if matches!(self.keys.get(key), Some(Entry::List(list)) if list.is_empty()) {
            self.keys.remove(key);
        }
    }

    fn remove_from_head(&mut self, key: &str, count: usize, value: &str) -> Result<usize, StoreError> {
        let Some(list) = self.list(key)? else {
            return Ok(0);
        };
        let mut removed = 0;
        let mut idx = 0;
        while idx < list.len() && removed < count {
            if list[idx] == value {
                list.remove(idx);
                removed += 1;
            } else {
                idx += 1;
            }
        }
        self.drop_if_empty(key);
        Ok(removed)
    }
}

/// MemoryStore keeps every key in process memory.
///
/// Clones share the same underlying data, like several clients talking to
/// one server.
///
/// # 実装詳細
/// - HashMap<String, Entry> でキーごとにリストか文字列を保持
/// - リストが空になったらキーごと削除（Redis と同じ挙動）
/// - `available` は AtomicBool なのでロックを取らずに障害を切り替えられる
///
/// # Example
/// ```ignore
/// let store = Arc::new(MemoryStore::new());
/// let conn = Connection::new("worker", store.clone());
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle availability. While unavailable every operation returns
    /// `StoreError::Unavailable` and no data changes.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of a list, head first. Absent lists read as empty.
    pub async fn list_contents(&self, list: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        match state.list(list) {
            Ok(Some(list)) => list.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Value of a string key, if present and not expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        match state.keys.get(key) {
            Some(Entry::Str { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListStore for MemoryStore {
    async fn lpush(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.list_or_create(list)?.push_front(value.to_string());
        Ok(())
    }

    async fn rpoplpush(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        // type-check dst before touching src so a failure changes nothing
        state.list(dst)?;

        let Some(value) = state.list(src)?.and_then(|list| list.pop_back()) else {
            return Ok(None);
        };
        state.drop_if_empty(src);
        state.list_or_create(dst)?.push_front(value.clone());
        Ok(Some(value))
    }

    async fn lrem(&self, list: &str, count: usize, value: &str) -> Result<usize, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.remove_from_head(list, count, value)
    }

    async fn llen(&self, list: &str) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        Ok(state.list(list)?.map_or(0, |list| list.len() as u64))
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        let ttl = match state.keys.get(key) {
            None => KeyTtl::Missing,
            Some(Entry::Str {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
            Some(_) => KeyTtl::Persistent,
        };
        Ok(ttl)
    }

    async fn lmove_value(&self, src: &str, dst: &str, value: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        // both keys are checked up front; the move must be all or nothing
        state.list(src)?;
        state.list(dst)?;

        if state.remove_from_head(src, 1, value)? == 0 {
            return Ok(false);
        }
        state.list_or_create(dst)?.push_front(value.to_string());
        Ok(true)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.keys.insert(
            key.to_string(),
            Entry::Str {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }
}
