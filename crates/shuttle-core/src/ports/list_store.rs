//! ListStore port - the ordered-list store every queue lives in.
//!
//! The store is the source of truth for list contents. A queue never caches
//! payloads; it only issues the primitives below and relies on each one
//! being atomic on the store side.
//!
//! # Implementations
//! - **MemoryStore** (`impls::memory_store`): in-process, for tests and demos.
//! - A networked backend (Redis and friends) plugs in behind the same trait.

use std::time::Duration;

use async_trait::async_trait;

/// StoreError is a transport or operation failure reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("key {key} holds a value of the wrong type")]
    WrongType { key: String },
}

/// Remaining lifetime of a key, as reported by a TTL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist (or already expired).
    Missing,

    /// The key exists and never expires.
    Persistent,

    /// The key exists and expires after the given duration.
    Expires(Duration),
}

/// ListStore exposes the list primitives the queue protocol is built on.
///
/// Naming follows the list commands of Redis, which is the store this
/// protocol was designed around: the head of a list is the "left" end.
///
/// # 設計原則
/// - 各メソッドは store 上で1回のアトミック操作
/// - `lmove_value` は削除と push を一体で行うこと。reject 後に payload が2つのリストに残ってはならない
///
/// # 将来の拡張
/// - Redis 実装は同じ trait の裏に差し込む（`lmove_value` は Lua スクリプトで実現）
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Push `value` onto the head of `list`, creating the list if needed.
    async fn lpush(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Pop the tail of `src` and push it onto the head of `dst`.
    ///
    /// Returns `None` when `src` is empty.
    async fn rpoplpush(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError>;

    /// Remove up to `count` occurrences of `value`, scanning from the head.
    ///
    /// Returns the number of entries removed.
    async fn lrem(&self, list: &str, count: usize, value: &str) -> Result<usize, StoreError>;

    /// Length of `list`; an absent list has length 0.
    async fn llen(&self, list: &str) -> Result<u64, StoreError>;

    /// Remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    /// Remove the first occurrence of `value` from `src` and push it onto the
    /// head of `dst`, atomically.
    ///
    /// Returns `false` (and pushes nothing) when `src` holds no such value.
    async fn lmove_value(&self, src: &str, dst: &str, value: &str) -> Result<bool, StoreError>;

    /// Set a string key that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
}
