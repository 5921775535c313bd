//! Job repository: typed access to the job table, the ready queue and the
//! sorted sets.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sentinel_core::{Job, JobId, JobStatus, score_of};

use crate::keys;
use crate::store::{Store, StoreError, StoreResult};

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|status| job.status == status)
            && self
                .job_type
                .as_deref()
                .is_none_or(|job_type| job.job_type == job_type)
    }
}

/// Sizes of the queue structures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub ready: usize,
    pub scheduled: usize,
    pub leased: usize,
}

/// Repository for job persistence operations.
///
/// Clones share the underlying store.
#[derive(Debug, Clone)]
pub struct JobRepository<S> {
    store: S,
}

impl<S: Store> JobRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write the full record, replacing any previous copy.
    pub async fn save(&self, job: &Job) -> StoreResult<()> {
        let body = serde_json::to_string(job)?;
        self.store
            .hash_set(keys::JOBS, &job.id.to_string(), &body)
            .await
    }

    /// Read a job by id. `None` when no record exists.
    pub async fn find(&self, id: JobId) -> StoreResult<Option<Job>> {
        self.find_raw(&id.to_string()).await
    }

    /// Read a job by the id string held in a queue or set.
    pub async fn find_raw(&self, id: &str) -> StoreResult<Option<Job>> {
        match self.store.hash_get(keys::JOBS, id).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// List jobs matching `filter`, oldest first.
    pub async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let mut jobs = Vec::new();
        for (id, body) in self.store.hash_get_all(keys::JOBS).await? {
            match serde_json::from_str::<Job>(&body) {
                Ok(job) if filter.matches(&job) => jobs.push(job),
                Ok(_) => {}
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Skipping unreadable job record"),
            }
        }

        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    /// Count jobs by status.
    pub async fn count_by_status(&self) -> StoreResult<HashMap<JobStatus, u64>> {
        let mut counts = HashMap::new();
        for job in self.list(&JobFilter::default()).await? {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Append a job id to the tail of the ready queue.
    pub async fn push_ready(&self, id: JobId) -> StoreResult<()> {
        self.push_ready_raw(&id.to_string()).await
    }

    /// Put a raw id string back onto the ready queue.
    pub async fn push_ready_raw(&self, id: &str) -> StoreResult<()> {
        self.store.list_push(keys::READY_QUEUE, id).await
    }

    /// Pop the head of the ready queue.
    pub async fn pop_ready(&self) -> StoreResult<Option<String>> {
        self.store.list_pop_front(keys::READY_QUEUE).await
    }

    /// Put a job id into the scheduled set at `due_at`.
    pub async fn schedule(&self, id: JobId, due_at: DateTime<Utc>) -> StoreResult<()> {
        self.schedule_raw(&id.to_string(), score_of(due_at)).await
    }

    /// Put a raw member back into the scheduled set.
    pub async fn schedule_raw(&self, member: &str, score: f64) -> StoreResult<()> {
        self.store.zset_add(keys::SCHEDULED, member, score).await
    }

    /// Pop up to `count` scheduled members, earliest first.
    pub async fn pop_scheduled(&self, count: usize) -> StoreResult<Vec<(String, f64)>> {
        self.store.zset_pop_min(keys::SCHEDULED, count).await
    }

    /// Record a running job's lease expiry.
    pub async fn track_lease(&self, id: JobId, expires_at: DateTime<Utc>) -> StoreResult<()> {
        self.track_lease_raw(&id.to_string(), score_of(expires_at))
            .await
    }

    /// Put a raw member back into the lease set.
    pub async fn track_lease_raw(&self, member: &str, score: f64) -> StoreResult<()> {
        self.store.zset_add(keys::LEASES, member, score).await
    }

    /// Drop a job's lease entry. Returns whether one was present.
    pub async fn release_lease(&self, id: JobId) -> StoreResult<bool> {
        self.release_lease_raw(&id.to_string()).await
    }

    pub async fn release_lease_raw(&self, member: &str) -> StoreResult<bool> {
        self.store.zset_remove(keys::LEASES, member).await
    }

    /// Pop up to `count` lease entries, earliest expiry first.
    pub async fn pop_leases(&self, count: usize) -> StoreResult<Vec<(String, f64)>> {
        self.store.zset_pop_min(keys::LEASES, count).await
    }

    /// Reserve `key` for `id`.
    ///
    /// Returns `None` when the reservation succeeded, or the id already
    /// holding the key.
    pub async fn reserve_idempotency(&self, key: &str, id: JobId) -> StoreResult<Option<JobId>> {
        let existing = self
            .store
            .hash_set_if_absent(keys::IDEMPOTENCY, key, &id.to_string())
            .await?;

        existing
            .map(|raw| {
                JobId::parse(&raw).map_err(|e| {
                    StoreError::Query(format!("Malformed idempotency entry for {key}: {e}"))
                })
            })
            .transpose()
    }

    /// Give up a reservation whose job was never stored.
    pub async fn release_idempotency(&self, key: &str) -> StoreResult<bool> {
        self.store.hash_remove(keys::IDEMPOTENCY, key).await
    }

    /// Current sizes of the ready queue, the scheduled set and the lease set.
    pub async fn depths(&self) -> StoreResult<QueueDepths> {
        Ok(QueueDepths {
            ready: self.store.list_len(keys::READY_QUEUE).await?,
            scheduled: self.store.zset_len(keys::SCHEDULED).await?,
            leased: self.store.zset_len(keys::LEASES).await?,
        })
    }
}
