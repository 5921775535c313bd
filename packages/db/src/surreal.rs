//! SurrealDB-backed [`Store`].
//!
//! Every list item and sorted-set member is its own record. Pops select a few
//! candidates and then claim each one with a single-record `DELETE ... RETURN
//! BEFORE`: only the caller whose delete commits gets the record back, and a
//! commit that loses to a concurrent writer counts as "already taken".
//!
//! Claims made through clones of one store are also serialized in-process,
//! which keeps workers on the same node from conflicting with each other.

use std::sync::{Arc, Mutex};

use futures_util::lock::Mutex as AsyncMutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

use crate::connection::{Database, DbConfig, connect};
use crate::schema::init_schema;
use crate::store::{Store, StoreResult, sort_by_score};

/// Hash table record.
#[derive(Debug, Serialize, Deserialize)]
struct HashEntry {
    entry_key: String,
    body: String,
}

/// List item record, keyed and ordered by `seq`.
#[derive(Debug, Serialize, Deserialize)]
struct ListItem {
    seq: String,
    value: String,
}

/// Sorted-set member record.
#[derive(Debug, Serialize, Deserialize)]
struct ZsetEntry {
    member: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: i64,
}

/// Candidates fetched per claim round.
const LIST_CANDIDATES: i64 = 4;

/// Rounds a pop makes before giving up to other claimers.
const MAX_CLAIM_ROUNDS: usize = 16;

const SET_IF_ABSENT: &str = "UPSERT ONLY type::thing($table, $key) \
     SET entry_key = $key, body = body ?? $value RETURN BEFORE";

const LIST_HEAD: &str = "SELECT seq, value FROM type::table($list) \
     ORDER BY seq ASC LIMIT $count";

const ZSET_LOWEST: &str = "SELECT member, score FROM type::table($set) \
     ORDER BY score ASC, member ASC LIMIT $count";

const COUNT: &str = "SELECT count() FROM type::table($table) GROUP ALL";

/// Store over a SurrealDB connection.
#[derive(Clone)]
pub struct SurrealStore {
    db: Database,
    claims: Arc<AsyncMutex<()>>,
    sequence: Arc<Mutex<Generator>>,
}

impl SurrealStore {
    /// Wrap an already configured connection.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            claims: Arc::new(AsyncMutex::new(())),
            sequence: Arc::new(Mutex::new(Generator::new())),
        }
    }

    /// Connect with `config` and make sure the schema exists.
    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        let db = connect(config).await?;
        init_schema(&db).await?;
        Ok(Self::new(db))
    }

    /// Underlying connection.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Monotonic within this process, time-ordered across processes.
    fn next_seq(&self) -> String {
        let mut generator = self
            .sequence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        generator
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }

    /// Delete one record, returning it only if this call removed it.
    async fn claim<T: DeserializeOwned>(&self, table: &str, key: &str) -> StoreResult<Option<T>> {
        match self.db.delete((table, key.to_string())).await {
            Ok(before) => Ok(before),
            Err(e) if is_conflict(&e) => {
                tracing::debug!(table, key, "Lost claim to a concurrent writer");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn count(&self, table: &str) -> StoreResult<usize> {
        let mut response = self
            .db
            .query(COUNT)
            .bind(("table", table.to_string()))
            .await?;

        let counts: Vec<CountResult> = response.take(0)?;
        Ok(counts.first().map_or(0, |c| c.count.max(0) as usize))
    }
}

/// Commit failures caused by a concurrent transaction touching the same keys.
fn is_conflict(error: &surrealdb::Error) -> bool {
    error.to_string().contains("conflict")
}

impl Store for SurrealStore {
    async fn hash_set(&self, table: &str, key: &str, value: &str) -> StoreResult<()> {
        let _: Option<HashEntry> = self
            .db
            .upsert((table, key.to_string()))
            .content(HashEntry {
                entry_key: key.to_string(),
                body: value.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn hash_set_if_absent(
        &self,
        table: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<Option<String>> {
        let _claims = self.claims.lock().await;
        let mut response = self
            .db
            .query(SET_IF_ABSENT)
            .bind(("table", table.to_string()))
            .bind(("key", key.to_string()))
            .bind(("value", value.to_string()))
            .await?;

        let before: Option<HashEntry> = response.take(0)?;
        Ok(before.map(|entry| entry.body))
    }

    async fn hash_get(&self, table: &str, key: &str) -> StoreResult<Option<String>> {
        let entry: Option<HashEntry> = self.db.select((table, key.to_string())).await?;
        Ok(entry.map(|entry| entry.body))
    }

    async fn hash_get_all(&self, table: &str) -> StoreResult<Vec<(String, String)>> {
        let entries: Vec<HashEntry> = self.db.select(table).await?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.entry_key, entry.body))
            .collect())
    }

    async fn hash_remove(&self, table: &str, key: &str) -> StoreResult<bool> {
        let removed: Option<HashEntry> = self.db.delete((table, key.to_string())).await?;
        Ok(removed.is_some())
    }

    async fn list_push(&self, list: &str, value: &str) -> StoreResult<()> {
        let seq = self.next_seq();
        let _: Option<ListItem> = self
            .db
            .create((list, seq.clone()))
            .content(ListItem {
                seq,
                value: value.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn list_pop_front(&self, list: &str) -> StoreResult<Option<String>> {
        let _claims = self.claims.lock().await;

        for _ in 0..MAX_CLAIM_ROUNDS {
            let mut response = self
                .db
                .query(LIST_HEAD)
                .bind(("list", list.to_string()))
                .bind(("count", LIST_CANDIDATES))
                .await?;
            let candidates: Vec<ListItem> = response.take(0)?;
            if candidates.is_empty() {
                return Ok(None);
            }

            for candidate in candidates {
                if let Some(item) = self.claim::<ListItem>(list, &candidate.seq).await? {
                    return Ok(Some(item.value));
                }
            }
        }

        Ok(None)
    }

    async fn list_len(&self, list: &str) -> StoreResult<usize> {
        self.count(list).await
    }

    async fn zset_add(&self, set: &str, member: &str, score: f64) -> StoreResult<()> {
        let _: Option<ZsetEntry> = self
            .db
            .upsert((set, member.to_string()))
            .content(ZsetEntry {
                member: member.to_string(),
                score,
            })
            .await?;
        Ok(())
    }

    async fn zset_pop_min(&self, set: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        let mut popped: Vec<(String, f64)> = Vec::new();
        if count == 0 {
            return Ok(popped);
        }

        let _claims = self.claims.lock().await;
        for _ in 0..MAX_CLAIM_ROUNDS {
            let wanted = count - popped.len();
            let mut response = self
                .db
                .query(ZSET_LOWEST)
                .bind(("set", set.to_string()))
                .bind(("count", wanted as i64))
                .await?;
            let candidates: Vec<ZsetEntry> = response.take(0)?;
            let exhausted = candidates.len() < wanted;

            for candidate in candidates {
                if let Some(entry) = self.claim::<ZsetEntry>(set, &candidate.member).await? {
                    popped.push((entry.member, entry.score));
                }
            }

            if exhausted || popped.len() == count {
                break;
            }
        }

        sort_by_score(&mut popped);
        Ok(popped)
    }

    async fn zset_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
        let removed: Option<ZsetEntry> = self.db.delete((set, member.to_string())).await?;
        Ok(removed.is_some())
    }

    async fn zset_len(&self, set: &str) -> StoreResult<usize> {
        self.count(set).await
    }
}
