//! Submission and control operations.

use std::time::Instant;

use chrono::{DateTime, Utc};
use sentinel_core::{DEFAULT_MAX_RETRIES, Job, JobEvent, JobId, JobStatus};
use sentinel_db::{JobFilter, QueueDepths, Store};

use crate::context::QueueContext;
use crate::error::{JobError, ServiceResult};

/// Parameters of a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub max_retries: u32,
    pub schedule_at: Option<DateTime<Utc>>,
}

impl SubmitRequest {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            idempotency_key: None,
            max_retries: DEFAULT_MAX_RETRIES,
            schedule_at: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Defer execution until `at`. Times not in the future queue immediately.
    pub fn schedule_at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule_at = Some(at);
        self
    }
}

/// Outcome of [`JobService::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub id: JobId,
    pub status: JobStatus,
    /// The idempotency key matched an existing job; nothing was created.
    pub duplicate: bool,
}

/// Upward-facing job operations: submit, get, list, cancel, retry.
pub struct JobService<S> {
    ctx: QueueContext<S>,
}

impl<S: Clone> Clone for JobService<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: Store> JobService<S> {
    pub fn new(ctx: QueueContext<S>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &QueueContext<S> {
        &self.ctx
    }

    /// Create a job and put it in the ready queue or the scheduled set.
    ///
    /// The record is written before its id enters either structure, so a
    /// failure in between leaves an orphaned record, never a dangling id.
    pub async fn submit(&self, request: SubmitRequest) -> ServiceResult<Submission> {
        let result = self.submit_inner(request).await;
        self.track(result)
    }

    async fn submit_inner(&self, request: SubmitRequest) -> ServiceResult<Submission> {
        let started = Instant::now();
        let now = Utc::now();
        let repo = self.ctx.repo();

        let mut job =
            Job::new(request.job_type, request.payload).with_max_retries(request.max_retries);
        if let Some(due_at) = request.schedule_at.filter(|at| *at > now) {
            job = job.scheduled_for(due_at);
        }

        if let Some(key) = request.idempotency_key {
            if let Some(existing) = repo.reserve_idempotency(&key, job.id).await? {
                let Some(found) = repo.find(existing).await? else {
                    return Err(JobError::IdempotencyConflict(key));
                };
                tracing::debug!(
                    job_id = %found.id,
                    idempotency_key = %key,
                    "Duplicate submission"
                );
                return Ok(Submission {
                    id: found.id,
                    status: found.status,
                    duplicate: true,
                });
            }
            job = job.with_idempotency_key(key);
        }

        if let Err(e) = repo.save(&job).await {
            // Nothing references the job yet, so free its key for a retry.
            if let Some(key) = &job.idempotency_key {
                if let Err(release) = repo.release_idempotency(key).await {
                    tracing::warn!(
                        idempotency_key = %key,
                        error = %release,
                        "Failed to release idempotency key"
                    );
                }
            }
            return Err(e.into());
        }
        match job.due_at {
            Some(due_at) if job.status == JobStatus::Scheduled => {
                repo.schedule(job.id, due_at).await?;
            }
            _ => {
                repo.push_ready(job.id).await?;
                self.ctx.metrics().job_enqueued();
                self.ctx.metrics().enqueue_latency(started.elapsed());
            }
        }
        self.ctx.metrics().job_submitted();

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            status = %job.status,
            "Job submitted"
        );
        self.ctx.emit(JobEvent::Submitted {
            job_id: job.id,
            job_type: job.job_type.clone(),
            status: job.status,
            timestamp: now,
        });

        Ok(Submission {
            id: job.id,
            status: job.status,
            duplicate: false,
        })
    }

    /// Read a job.
    pub async fn get(&self, id: JobId) -> ServiceResult<Job> {
        let result = self.load(id).await;
        self.track(result)
    }

    /// All jobs matching `filter`, oldest first.
    pub async fn list(&self, filter: &JobFilter) -> ServiceResult<Vec<Job>> {
        let result = self.ctx.repo().list(filter).await.map_err(JobError::from);
        self.track(result)
    }

    /// Mark a job cancelled.
    ///
    /// Queue membership is left alone; workers and the promoter skip the id
    /// when they reach it. A running handler is not interrupted, but its
    /// outcome is discarded.
    pub async fn cancel(&self, id: JobId) -> ServiceResult<Job> {
        let result = self.cancel_inner(id).await;
        self.track(result)
    }

    async fn cancel_inner(&self, id: JobId) -> ServiceResult<Job> {
        let now = Utc::now();
        let mut job = self.load(id).await?;
        let was_running = job.status == JobStatus::Running;

        job.cancel(now);
        self.ctx.repo().save(&job).await?;
        if was_running {
            self.ctx.repo().release_lease(id).await?;
        }

        tracing::info!(job_id = %id, "Job cancelled");
        self.ctx.emit(JobEvent::Cancelled {
            job_id: id,
            timestamp: now,
        });
        Ok(job)
    }

    /// Reset a job to `queued` with a fresh attempt budget and push it onto
    /// the ready queue, whatever state it was in.
    pub async fn retry(&self, id: JobId) -> ServiceResult<Job> {
        let result = self.retry_inner(id).await;
        self.track(result)
    }

    async fn retry_inner(&self, id: JobId) -> ServiceResult<Job> {
        let started = Instant::now();
        let now = Utc::now();
        let mut job = self.load(id).await?;
        let was_running = job.status == JobStatus::Running;

        job.reset_for_retry(now);
        self.ctx.repo().save(&job).await?;
        if was_running {
            self.ctx.repo().release_lease(id).await?;
        }
        self.ctx.repo().push_ready(id).await?;
        self.ctx.metrics().job_enqueued();
        self.ctx.metrics().enqueue_latency(started.elapsed());

        tracing::info!(job_id = %id, "Job retried");
        self.ctx.emit(JobEvent::Retried {
            job_id: id,
            timestamp: now,
        });
        Ok(job)
    }

    /// Sizes of the ready queue, scheduled set and lease set.
    pub async fn depths(&self) -> ServiceResult<QueueDepths> {
        let result = self.ctx.repo().depths().await.map_err(JobError::from);
        self.track(result)
    }

    async fn load(&self, id: JobId) -> ServiceResult<Job> {
        self.ctx
            .repo()
            .find(id)
            .await?
            .ok_or(JobError::NotFound(id))
    }

    fn track<T>(&self, result: ServiceResult<T>) -> ServiceResult<T> {
        if let Err(JobError::StoreUnavailable(e)) = &result {
            self.ctx.metrics().error();
            tracing::warn!(error = %e, "Store operation failed");
        }
        result
    }
}
