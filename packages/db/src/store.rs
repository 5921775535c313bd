//! Store capability consumed by the queue engine.
//!
//! Three logical structures live behind this trait: hash tables (key to
//! value), FIFO lists, and sorted sets (member to score). Every method is a
//! single atomic operation against the backing store; the engine builds its
//! guarantees on that and adds no locking of its own.

use std::future::Future;

use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Atomic primitives over hash tables, lists and sorted sets.
pub trait Store: Clone + Send + Sync + 'static {
    /// Set `key` in `table`, replacing any previous value.
    fn hash_set(&self, table: &str, key: &str, value: &str)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Set `key` only when it is absent. Returns the existing value otherwise.
    fn hash_set_if_absent(
        &self,
        table: &str,
        key: &str,
        value: &str,
    ) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    fn hash_get(&self, table: &str, key: &str)
    -> impl Future<Output = StoreResult<Option<String>>> + Send;

    /// All `(key, value)` pairs of `table`, in no particular order.
    fn hash_get_all(&self, table: &str)
    -> impl Future<Output = StoreResult<Vec<(String, String)>>> + Send;

    /// Remove `key` from `table`. Returns whether it was present.
    fn hash_remove(&self, table: &str, key: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Append to the tail of `list`.
    fn list_push(&self, list: &str, value: &str) -> impl Future<Output = StoreResult<()>> + Send;

    /// Remove and return the head of `list`.
    fn list_pop_front(&self, list: &str) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    fn list_len(&self, list: &str) -> impl Future<Output = StoreResult<usize>> + Send;

    /// Add `member` with `score`, updating the score of an existing member.
    fn zset_add(&self, set: &str, member: &str, score: f64)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Remove and return up to `count` members with the smallest scores,
    /// ordered by ascending score (ties by member).
    fn zset_pop_min(
        &self,
        set: &str,
        count: usize,
    ) -> impl Future<Output = StoreResult<Vec<(String, f64)>>> + Send;

    /// Remove `member`. Returns whether it was present.
    fn zset_remove(&self, set: &str, member: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    fn zset_len(&self, set: &str) -> impl Future<Output = StoreResult<usize>> + Send;
}

/// Order popped sorted-set entries the way `zset_pop_min` promises.
pub(crate) fn sort_by_score(entries: &mut [(String, f64)]) {
    entries.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
}
