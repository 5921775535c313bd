//! Promoter: moves due jobs from the scheduled set to the ready queue, and
//! reaps expired leases.
//!
//! Both passes use the same shape: atomically pop the lowest-scored members,
//! split them at `now`, put the not-yet-due suffix back, then act on the due
//! prefix. A popped member belongs to exactly one promoter, so concurrent
//! promoters never promote or reap the same id twice.

use std::marker::PhantomData;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use sentinel_core::{JobEvent, JobStatus, score_of};
use sentinel_db::Store;

use crate::config::PromoterConfig;
use crate::context::QueueContext;
use crate::error::ServiceResult;
use crate::messages::PromoterMessage;

/// Error recorded on jobs whose worker stopped reporting back.
pub const LEASE_EXPIRED: &str = "lease expired";

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Scheduled jobs pushed onto the ready queue.
    pub promoted: usize,
    /// Popped members put back because they are not due yet.
    pub deferred: usize,
    /// Due members dropped because the record is gone or no longer scheduled.
    pub skipped: usize,
    /// Expired leases acted on.
    pub reaped: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Add another report's counts to this one.
    pub fn absorb(&mut self, other: TickReport) {
        self.promoted += other.promoted;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
        self.reaped += other.reaped;
    }
}

/// Which sorted set a popped batch came from.
#[derive(Debug, Clone, Copy)]
enum Pass {
    Promote,
    Reap,
}

/// One promoter replica.
pub struct Promoter<S> {
    ctx: QueueContext<S>,
    config: PromoterConfig,
}

impl<S: Store> Promoter<S> {
    pub fn new(ctx: QueueContext<S>, config: PromoterConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &PromoterConfig {
        &self.config
    }

    pub fn context(&self) -> &QueueContext<S> {
        &self.ctx
    }

    /// Run one tick against the current time.
    pub async fn tick(&self) -> ServiceResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick treating `now` as the current time.
    ///
    /// A store error aborts the tick. Members popped but not yet handled are
    /// put back with their original score before the error is returned.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> ServiceResult<TickReport> {
        let mut report = TickReport::default();
        self.promote_due(now, &mut report).await?;
        if self.config.reap_leases {
            self.reap_expired(now, &mut report).await?;
        }

        if !report.is_empty() {
            tracing::debug!(
                promoted = report.promoted,
                deferred = report.deferred,
                skipped = report.skipped,
                reaped = report.reaped,
                "Promoter tick"
            );
        }
        Ok(report)
    }

    async fn promote_due(&self, now: DateTime<Utc>, report: &mut TickReport) -> ServiceResult<()> {
        let popped = self
            .ctx
            .repo()
            .pop_scheduled(self.config.batch_size.max(1))
            .await?;
        let (due, not_yet_due) = split_due(&popped, now);

        self.put_back(Pass::Promote, not_yet_due, due).await?;
        report.deferred += not_yet_due.len();

        for (index, (member, _)) in due.iter().enumerate() {
            match self.promote_one(member, now).await {
                Ok(true) => report.promoted += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    self.restore(Pass::Promote, &due[index..]).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn promote_one(&self, member: &str, now: DateTime<Utc>) -> ServiceResult<bool> {
        let repo = self.ctx.repo();
        let Some(mut job) = repo.find_raw(member).await? else {
            tracing::debug!(job_id = %member, "Scheduled id has no record, dropping");
            return Ok(false);
        };
        if job.status != JobStatus::Scheduled {
            tracing::debug!(
                job_id = %member,
                status = %job.status,
                "Scheduled id is no longer scheduled, dropping"
            );
            return Ok(false);
        }

        let started = std::time::Instant::now();
        job.promote(now)?;
        repo.save(&job).await?;
        repo.push_ready(job.id).await?;
        self.ctx.metrics().job_enqueued();
        self.ctx.metrics().enqueue_latency(started.elapsed());

        tracing::debug!(job_id = %job.id, "Job promoted");
        self.ctx.emit(JobEvent::Promoted {
            job_id: job.id,
            timestamp: now,
        });
        Ok(true)
    }

    async fn reap_expired(&self, now: DateTime<Utc>, report: &mut TickReport) -> ServiceResult<()> {
        let popped = self
            .ctx
            .repo()
            .pop_leases(self.config.batch_size.max(1))
            .await?;
        let (expired, live) = split_due(&popped, now);

        self.put_back(Pass::Reap, live, expired).await?;

        for (index, (member, _)) in expired.iter().enumerate() {
            match self.reap_one(member, now).await {
                Ok(true) => report.reaped += 1,
                Ok(false) => {}
                Err(e) => {
                    self.restore(Pass::Reap, &expired[index..]).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn reap_one(&self, member: &str, now: DateTime<Utc>) -> ServiceResult<bool> {
        let repo = self.ctx.repo();
        let Some(mut job) = repo.find_raw(member).await? else {
            return Ok(false);
        };

        match job.status {
            JobStatus::Running => {
                let Some(lease) = job.lease.clone() else {
                    tracing::error!(job_id = %job.id, "Running job has no lease");
                    return Ok(false);
                };
                if !lease.is_expired(now) {
                    // Re-claimed under a newer lease.
                    repo.track_lease(job.id, lease.expires_at).await?;
                    return Ok(false);
                }

                tracing::warn!(
                    job_id = %job.id,
                    worker_id = %lease.worker_id,
                    expired_at = %lease.expires_at,
                    "Lease expired"
                );
                self.ctx.emit(JobEvent::LeaseExpired {
                    job_id: job.id,
                    worker_id: lease.worker_id,
                    timestamp: now,
                });
                self.ctx
                    .settle_failure(&mut job, LEASE_EXPIRED.to_string(), Duration::ZERO, false, now)
                    .await?;
                Ok(true)
            }
            JobStatus::Queued => {
                // Claimed, then lost before the worker marked it running.
                repo.push_ready(job.id).await?;
                self.ctx.metrics().job_enqueued();
                tracing::warn!(job_id = %job.id, "Re-queued job abandoned at claim");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Re-insert the not-yet-due members. On failure, try to restore those and
    /// the due members too, since the tick will not get to them.
    async fn put_back(
        &self,
        pass: Pass,
        pending: &[(String, f64)],
        due: &[(String, f64)],
    ) -> ServiceResult<()> {
        for (index, (member, score)) in pending.iter().enumerate() {
            if let Err(e) = self.reinsert(pass, member, *score).await {
                self.restore(pass, &pending[index..]).await;
                self.restore(pass, due).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Best-effort re-insert after an aborted tick.
    async fn restore(&self, pass: Pass, members: &[(String, f64)]) {
        for (member, score) in members {
            if let Err(e) = self.reinsert(pass, member, *score).await {
                tracing::error!(
                    job_id = %member,
                    score,
                    pass = ?pass,
                    error = %e,
                    "Failed to restore popped member"
                );
            }
        }
    }

    async fn reinsert(&self, pass: Pass, member: &str, score: f64) -> ServiceResult<()> {
        let repo = self.ctx.repo();
        match pass {
            Pass::Promote => repo.schedule_raw(member, score).await?,
            Pass::Reap => repo.track_lease_raw(member, score).await?,
        }
        Ok(())
    }
}

/// Split an ascending batch into the prefix with `score <= now` and the rest.
fn split_due(batch: &[(String, f64)], now: DateTime<Utc>) -> (&[(String, f64)], &[(String, f64)]) {
    let cutoff = score_of(now);
    let split = batch.partition_point(|(_, score)| *score <= cutoff);
    batch.split_at(split)
}

/// State for the promoter actor.
pub struct PromoterActorState<S> {
    promoter: Promoter<S>,
    totals: TickReport,
}

/// Actor running a [`Promoter`] on its poll interval.
pub struct PromoterActor<S>(PhantomData<fn() -> S>);

impl<S> PromoterActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for PromoterActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> Actor for PromoterActor<S> {
    type Msg = PromoterMessage;
    type State = PromoterActorState<S>;
    type Arguments = Promoter<S>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            poll_interval_ms = args.config.poll_interval.as_millis() as u64,
            batch_size = args.config.batch_size,
            "Starting promoter"
        );
        Ok(PromoterActorState {
            promoter: args,
            totals: TickReport::default(),
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(PromoterMessage::Tick)?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PromoterMessage::Tick => {
                match state.promoter.tick().await {
                    Ok(report) => state.totals.absorb(report),
                    Err(e) => {
                        state.promoter.ctx.metrics().error();
                        tracing::warn!(error = %e, "Promoter tick failed");
                    }
                }

                // Re-arm after the interval
                let interval = state.promoter.config.poll_interval;
                tokio::spawn(async move {
                    tokio::time::sleep(interval).await;
                    let _ = myself.send_message(PromoterMessage::Tick);
                });
            }

            PromoterMessage::GetTotals { reply } => {
                let _ = reply.send(state.totals);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(scores: &[f64]) -> Vec<(String, f64)> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("job-{i}"), *s))
            .collect()
    }

    #[test]
    fn split_due_includes_equal_scores() {
        let now = DateTime::from_timestamp(100, 0).unwrap_or_default();
        let popped = batch(&[98.0, 99.5, 100.0, 100.001, 250.0]);
        let (due, later) = split_due(&popped, now);
        assert_eq!(due.len(), 3);
        assert_eq!(later.len(), 2);
        assert_eq!(later[0].1, 100.001);
    }

    #[test]
    fn split_due_handles_empty_and_all_due() {
        let now = DateTime::from_timestamp(100, 0).unwrap_or_default();
        let (due, later) = split_due(&[], now);
        assert!(due.is_empty() && later.is_empty());

        let popped = batch(&[1.0, 2.0]);
        let (due, later) = split_due(&popped, now);
        assert_eq!(due.len(), 2);
        assert!(later.is_empty());
    }

    #[test]
    fn reports_accumulate() {
        let mut totals = TickReport::default();
        assert!(totals.is_empty());
        totals.absorb(TickReport {
            promoted: 2,
            deferred: 1,
            skipped: 0,
            reaped: 1,
        });
        totals.absorb(TickReport {
            promoted: 3,
            ..Default::default()
        });
        assert_eq!(totals.promoted, 5);
        assert_eq!(totals.reaped, 1);
        assert!(!totals.is_empty());
    }
}
