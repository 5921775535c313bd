//! Worker: claims jobs from the ready queue and executes them.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use sentinel_core::{FailureOutcome, Job, JobEvent, JobId, JobResult, score_of};
use sentinel_db::Store;

use crate::config::WorkerConfig;
use crate::context::{QueueContext, offset};
use crate::error::ServiceResult;
use crate::handler::JobHandlerRegistry;
use crate::messages::WorkerMessage;

/// Result of one [`Worker::poll_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The ready queue was empty.
    Idle,
    /// The claimed id had no record or was no longer actionable.
    Skipped(String),
    /// The handler succeeded.
    Completed(JobId),
    /// The handler failed and the job will run again.
    Retrying(JobId),
    /// The handler failed and retries are exhausted.
    Failed(JobId),
    /// The lease was lost while executing (cancelled, retried or reaped);
    /// the outcome was discarded.
    Abandoned(JobId),
}

/// One worker replica.
pub struct Worker<S> {
    worker_id: String,
    ctx: QueueContext<S>,
    handlers: Arc<JobHandlerRegistry>,
    config: WorkerConfig,
}

impl<S: Store> Worker<S> {
    pub fn new(
        worker_id: impl Into<String>,
        ctx: QueueContext<S>,
        handlers: Arc<JobHandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            ctx,
            handlers,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim the head of the ready queue and run it to an outcome.
    pub async fn poll_once(&self) -> ServiceResult<PollOutcome> {
        let repo = self.ctx.repo();
        let Some(claimed) = repo.pop_ready().await? else {
            return Ok(PollOutcome::Idle);
        };

        // Lease the id before anything else can fail, so the reaper can
        // return it to the queue if this worker never gets to run it.
        let now = Utc::now();
        let lease_expires_at =
            offset(now, self.config.lease_duration()).unwrap_or(DateTime::<Utc>::MAX_UTC);
        if let Err(e) = repo.track_lease_raw(&claimed, score_of(lease_expires_at)).await {
            if let Err(requeue) = repo.push_ready_raw(&claimed).await {
                tracing::error!(job_id = %claimed, error = %requeue, "Failed to requeue claimed id");
            }
            return Err(e.into());
        }

        let mut job = match repo.find_raw(&claimed).await? {
            Some(job) if job.status.is_actionable() => job,
            other => {
                match other.as_ref().and_then(|job| job.lease.as_ref()) {
                    // Still held by another worker: put its own expiry back.
                    Some(lease) => {
                        repo.track_lease_raw(&claimed, score_of(lease.expires_at))
                            .await?
                    }
                    None => {
                        repo.release_lease_raw(&claimed).await?;
                    }
                }
                tracing::debug!(
                    job_id = %claimed,
                    status = ?other.map(|job| job.status),
                    "Claimed id is not runnable, skipping"
                );
                return Ok(PollOutcome::Skipped(claimed));
            }
        };

        job.start(self.worker_id.as_str(), lease_expires_at, now)?;
        repo.save(&job).await?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            worker_id = %self.worker_id,
            "Job started"
        );
        self.ctx.emit(JobEvent::Started {
            job_id: job.id,
            worker_id: self.worker_id.clone(),
            timestamp: now,
        });

        let started = Instant::now();
        let result = self.execute(&job).await;
        let elapsed = started.elapsed();

        self.record_outcome(job.id, result, elapsed).await
    }

    /// Poll until the ready queue is empty. Returns every non-idle outcome.
    pub async fn drain(&self) -> ServiceResult<Vec<PollOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            match self.poll_once().await? {
                PollOutcome::Idle => return Ok(outcomes),
                outcome => outcomes.push(outcome),
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<JobResult, String> {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            return Err(format!("No handler for job type: {}", job.job_type));
        };

        let timeout = self.config.execution_timeout;
        match tokio::time::timeout(timeout, handler.handle(job)).await {
            Ok(result) => result,
            Err(_) => Err(format!("Job timed out after {}s", timeout.as_secs_f64())),
        }
    }

    async fn record_outcome(
        &self,
        job_id: JobId,
        result: Result<JobResult, String>,
        elapsed: std::time::Duration,
    ) -> ServiceResult<PollOutcome> {
        let repo = self.ctx.repo();
        let now = Utc::now();

        let current = repo.find(job_id).await?;
        let Some(mut job) = current.filter(|job| job.is_leased_by(&self.worker_id)) else {
            tracing::warn!(
                job_id = %job_id,
                worker_id = %self.worker_id,
                "Lease lost during execution, discarding outcome"
            );
            return Ok(PollOutcome::Abandoned(job_id));
        };

        match result {
            Ok(output) => {
                job.complete(Some(output), now)?;
                repo.save(&job).await?;
                repo.release_lease(job_id).await?;

                self.ctx.metrics().job_executed();
                self.ctx.metrics().execution_latency(elapsed);
                tracing::info!(
                    job_id = %job_id,
                    attempts = job.attempts,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
                self.ctx.emit(JobEvent::Completed {
                    job_id,
                    worker_id: self.worker_id.clone(),
                    duration_ms: elapsed.as_millis() as u64,
                    timestamp: now,
                });
                Ok(PollOutcome::Completed(job_id))
            }
            Err(error) => {
                tracing::warn!(job_id = %job_id, error = %error, "Job attempt failed");
                self.ctx.metrics().execution_latency(elapsed);
                let backoff = self.config.backoff_for(job.attempts.saturating_add(1));
                let outcome = self
                    .ctx
                    .settle_failure(&mut job, error, backoff, true, now)
                    .await?;
                Ok(match outcome {
                    FailureOutcome::Retry { .. } => PollOutcome::Retrying(job_id),
                    FailureOutcome::Exhausted => PollOutcome::Failed(job_id),
                })
            }
        }
    }
}

/// State for the worker actor.
pub struct WorkerActorState<S> {
    worker: Worker<S>,
    processed: u64,
}

/// Actor running a [`Worker`] loop.
pub struct WorkerActor<S>(PhantomData<fn() -> S>);

impl<S> WorkerActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for WorkerActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> Actor for WorkerActor<S> {
    type Msg = WorkerMessage;
    type State = WorkerActorState<S>;
    type Arguments = Worker<S>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);
        Ok(WorkerActorState {
            worker: args,
            processed: 0,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            processed = state.processed,
            "Stopped worker: {}",
            state.worker.worker_id
        );
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                let busy = match state.worker.poll_once().await {
                    Ok(PollOutcome::Idle) => false,
                    Ok(_) => {
                        state.processed += 1;
                        true
                    }
                    Err(e) => {
                        state.worker.ctx.metrics().error();
                        tracing::warn!(
                            worker_id = %state.worker.worker_id,
                            error = %e,
                            "Worker poll failed"
                        );
                        false
                    }
                };

                if busy {
                    myself.send_message(WorkerMessage::Poll)?;
                } else {
                    // Nothing to do; poll again after the interval
                    let interval = state.worker.config.poll_interval;
                    tokio::spawn(async move {
                        tokio::time::sleep(interval).await;
                        let _ = myself.send_message(WorkerMessage::Poll);
                    });
                }
            }

            WorkerMessage::GetProcessed { reply } => {
                let _ = reply.send(state.processed);
            }
        }

        Ok(())
    }
}
