//! Collaborators shared by the service, the promoter and the workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sentinel_core::{FailureOutcome, Job, JobEvent};
use sentinel_db::{JobRepository, Store};
use tokio::sync::broadcast;

use crate::error::ServiceResult;
use crate::metrics::{Metrics, NoopMetrics};

/// Store, metrics and event channel handed to every engine component.
pub struct QueueContext<S> {
    repo: JobRepository<S>,
    metrics: Arc<dyn Metrics>,
    events: Option<broadcast::Sender<JobEvent>>,
}

impl<S: Clone> Clone for QueueContext<S> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            metrics: self.metrics.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: Store> QueueContext<S> {
    /// Context over `store` with metrics disabled and no event channel.
    pub fn new(store: S) -> Self {
        Self {
            repo: JobRepository::new(store),
            metrics: Arc::new(NoopMetrics),
            events: None,
        }
    }

    /// Set the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn repo(&self) -> &JobRepository<S> {
        &self.repo
    }

    pub fn metrics(&self) -> &dyn Metrics {
        self.metrics.as_ref()
    }

    /// Subscribe to lifecycle events, if a broadcaster is configured.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<JobEvent>> {
        self.events.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Record a failed attempt of a running job and route it onward.
    ///
    /// Retries go back to the ready queue, or through the scheduled set when
    /// `backoff` is non-zero. Exhausted jobs stay in the table as `failed`.
    /// With `release_lease` the lease entry is dropped after the record is
    /// written and before the id can be claimed again.
    pub(crate) async fn settle_failure(
        &self,
        job: &mut Job,
        error: String,
        backoff: Duration,
        release_lease: bool,
        now: DateTime<Utc>,
    ) -> ServiceResult<FailureOutcome> {
        let outcome = job.fail(error.clone(), now)?;

        match outcome {
            FailureOutcome::Retry { attempt } => match offset(now, backoff) {
                Some(due_at) if !backoff.is_zero() => {
                    job.defer(due_at, now)?;
                    self.repo.save(job).await?;
                    self.release(job, release_lease).await?;
                    self.repo.schedule(job.id, due_at).await?;
                    tracing::info!(
                        job_id = %job.id,
                        attempt,
                        due_at = %due_at,
                        "Retry scheduled"
                    );
                }
                _ => {
                    self.repo.save(job).await?;
                    self.release(job, release_lease).await?;
                    self.repo.push_ready(job.id).await?;
                    self.metrics.job_enqueued();
                    tracing::info!(job_id = %job.id, attempt, "Retry queued");
                }
            },
            FailureOutcome::Exhausted => {
                self.repo.save(job).await?;
                self.release(job, release_lease).await?;
                tracing::warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = %error,
                    "Job failed, retries exhausted"
                );
            }
        }

        self.metrics.job_failed();
        self.emit(JobEvent::Failed {
            job_id: job.id,
            error,
            attempts: job.attempts,
            will_retry: matches!(outcome, FailureOutcome::Retry { .. }),
            timestamp: now,
        });
        Ok(outcome)
    }

    async fn release(&self, job: &Job, release_lease: bool) -> ServiceResult<()> {
        if release_lease {
            self.repo.release_lease(job.id).await?;
        }
        Ok(())
    }
}

/// `now + duration`, or `None` when it does not fit a timestamp.
pub(crate) fn offset(now: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}
