//! Process-local store used by tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::{sort_by_score, Store, StoreError, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
}

/// In-memory [`Store`]. Clones share the same data.
///
/// Each operation runs under a single mutex, which makes it atomic with
/// respect to every other operation on the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    async fn hash_set(&self, table: &str, key: &str, value: &str) -> StoreResult<()> {
        self.lock()?
            .hashes
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_set_if_absent(
        &self,
        table: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<Option<String>> {
        let mut state = self.lock()?;
        let hash = state.hashes.entry(table.to_string()).or_default();
        if let Some(existing) = hash.get(key) {
            return Ok(Some(existing.clone()));
        }
        hash.insert(key.to_string(), value.to_string());
        Ok(None)
    }

    async fn hash_get(&self, table: &str, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .lock()?
            .hashes
            .get(table)
            .and_then(|hash| hash.get(key))
            .cloned())
    }

    async fn hash_get_all(&self, table: &str) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .lock()?
            .hashes
            .get(table)
            .map(|hash| {
                hash.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hash_remove(&self, table: &str, key: &str) -> StoreResult<bool> {
        Ok(self
            .lock()?
            .hashes
            .get_mut(table)
            .is_some_and(|hash| hash.remove(key).is_some()))
    }

    async fn list_push(&self, list: &str, value: &str) -> StoreResult<()> {
        self.lock()?
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_pop_front(&self, list: &str) -> StoreResult<Option<String>> {
        Ok(self
            .lock()?
            .lists
            .get_mut(list)
            .and_then(VecDeque::pop_front))
    }

    async fn list_len(&self, list: &str) -> StoreResult<usize> {
        Ok(self.lock()?.lists.get(list).map_or(0, VecDeque::len))
    }

    async fn zset_add(&self, set: &str, member: &str, score: f64) -> StoreResult<()> {
        self.lock()?
            .zsets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zset_pop_min(&self, set: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        let mut state = self.lock()?;
        let Some(zset) = state.zsets.get_mut(set) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<(String, f64)> =
            zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        sort_by_score(&mut entries);
        entries.truncate(count);

        for (member, _) in &entries {
            zset.remove(member);
        }
        Ok(entries)
    }

    async fn zset_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .lock()?
            .zsets
            .get_mut(set)
            .is_some_and(|zset| zset.remove(member).is_some()))
    }

    async fn zset_len(&self, set: &str) -> StoreResult<usize> {
        Ok(self.lock()?.zsets.get(set).map_or(0, HashMap::len))
    }
}
