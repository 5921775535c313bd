//! Job domain types and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Default number of automatic retries granted to a new job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is referenced by the ready queue and waiting for a worker.
    #[default]
    Queued,
    /// Job is referenced by the scheduled set until its due time.
    Scheduled,
    /// Job has been claimed and is executing.
    Running,
    /// Handler finished successfully.
    Completed,
    /// Job was cancelled by an operator.
    Cancelled,
    /// Handler failed and the retry budget is spent.
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    /// Whether a worker that just claimed this job may start it.
    pub fn is_actionable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Scheduled)
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// Time-bounded claim held by the worker executing a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} job {job_id} while it is {from}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub action: &'static str,
}

/// What a failed attempt turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Attempts remain; the job is `queued` again.
    Retry { attempt: u32 },
    /// Retry budget spent; the job is `failed`.
    Exhausted,
}

/// A job represents a unit of work to be executed by the queue system.
///
/// The job table holds exactly one copy of this record. Queues and sets only
/// ever reference the [`JobId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Type of job (used for routing to handlers).
    #[serde(rename = "type")]
    pub job_type: String,
    /// Job payload as JSON, opaque to the queue.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Number of finished execution attempts.
    #[serde(default)]
    pub attempts: u32,
    /// Maximum number of automatic retries after a failed attempt.
    pub max_retries: u32,
    /// Deduplication key supplied by the submitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Error reported by the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Handler output of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Present only while `running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
            due_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_error: None,
            result: None,
            lease: None,
        }
    }

    /// Set the max retries for this job.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Defer this job until `due_at`.
    pub fn scheduled_for(mut self, due_at: DateTime<Utc>) -> Self {
        self.status = JobStatus::Scheduled;
        self.due_at = Some(due_at);
        self
    }

    /// True when `worker_id` holds the lease of a running job.
    pub fn is_leased_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Running
            && self
                .lease
                .as_ref()
                .is_some_and(|lease| lease.worker_id == worker_id)
    }

    fn reject(&self, action: &'static str) -> TransitionError {
        TransitionError {
            job_id: self.id,
            from: self.status,
            action,
        }
    }

    /// `scheduled -> queued`, performed by the promoter.
    pub fn promote(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Scheduled {
            return Err(self.reject("promote"));
        }
        self.status = JobStatus::Queued;
        self.updated_at = now;
        Ok(())
    }

    /// `queued -> running` under a lease held by `worker_id`.
    pub fn start(
        &mut self,
        worker_id: impl Into<String>,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.is_actionable() {
            return Err(self.reject("start"));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        self.lease = Some(Lease {
            worker_id: worker_id.into(),
            expires_at: lease_expires_at,
        });
        Ok(())
    }

    /// `running -> completed`.
    pub fn complete(
        &mut self,
        result: Option<JobResult>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != JobStatus::Running {
            return Err(self.reject("complete"));
        }
        self.status = JobStatus::Completed;
        self.attempts = self.attempts.saturating_add(1);
        self.completed_at = Some(now);
        self.updated_at = now;
        self.result = result;
        self.lease = None;
        Ok(())
    }

    /// Leave `running` after a failed attempt.
    ///
    /// Retries while the attempts made before this one are below `max_retries`,
    /// otherwise the job becomes `failed`.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, TransitionError> {
        if self.status != JobStatus::Running {
            return Err(self.reject("fail"));
        }
        let previous = self.attempts;
        self.attempts = previous.saturating_add(1);
        self.last_error = Some(error.into());
        self.lease = None;
        self.updated_at = now;

        if previous < self.max_retries {
            self.status = JobStatus::Queued;
            self.started_at = None;
            Ok(FailureOutcome::Retry {
                attempt: self.attempts.saturating_add(1),
            })
        } else {
            self.status = JobStatus::Failed;
            self.failed_at = Some(now);
            Ok(FailureOutcome::Exhausted)
        }
    }

    /// Park a job that is being retried with backoff in the scheduled set.
    pub fn defer(&mut self, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Queued {
            return Err(self.reject("defer"));
        }
        self.status = JobStatus::Scheduled;
        self.due_at = Some(due_at);
        self.updated_at = now;
        Ok(())
    }

    /// Any state -> `cancelled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.lease = None;
        self.updated_at = now;
    }

    /// Any state -> `queued` with a fresh attempt budget.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.attempts = 0;
        self.started_at = None;
        self.completed_at = None;
        self.failed_at = None;
        self.last_error = None;
        self.result = None;
        self.lease = None;
        self.updated_at = now;
    }
}

/// Sorted-set score for a timestamp: epoch seconds with millisecond precision.
pub fn score_of(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Inverse of [`score_of`]. Out-of-range scores clamp to the epoch.
pub fn time_of(score: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((score * 1000.0).round() as i64).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn running_job(max_retries: u32) -> Job {
        let now = Utc::now();
        let mut job = Job::new("email", json!({"to": "a@b.com"})).with_max_retries(max_retries);
        job.start("worker-1", now + Duration::seconds(30), now).unwrap();
        job
    }

    #[test]
    fn new_job_is_queued_without_attempts() {
        let job = Job::new("email", json!({}));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert!(job.due_at.is_none());
    }

    #[test]
    fn scheduled_job_promotes_once() {
        let due = Utc::now() + Duration::seconds(5);
        let mut job = Job::new("report", json!({})).scheduled_for(due);
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.due_at, Some(due));

        job.promote(Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.promote(Utc::now()).is_err());
    }

    #[test]
    fn complete_increments_attempts_and_drops_lease() {
        let mut job = running_job(3);
        assert!(job.is_leased_by("worker-1"));
        assert!(!job.is_leased_by("worker-2"));

        job.complete(Some(JobResult::new("sent")), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert!(job.completed_at.is_some());
        assert!(job.lease.is_none());
    }

    #[test]
    fn start_requires_actionable_status() {
        let mut job = running_job(3);
        job.cancel(Utc::now());
        let err = job
            .start("worker-2", Utc::now(), Utc::now())
            .unwrap_err();
        assert_eq!(err.from, JobStatus::Cancelled);
        assert_eq!(err.action, "start");
    }

    #[test]
    fn failure_retries_until_budget_is_spent() {
        let mut job = running_job(2);
        assert_eq!(
            job.fail("boom", Utc::now()).unwrap(),
            FailureOutcome::Retry { attempt: 2 }
        );
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);

        job.start("worker-1", Utc::now(), Utc::now()).unwrap();
        assert_eq!(
            job.fail("boom", Utc::now()).unwrap(),
            FailureOutcome::Retry { attempt: 3 }
        );

        job.start("worker-1", Utc::now(), Utc::now()).unwrap();
        assert_eq!(job.fail("boom", Utc::now()).unwrap(), FailureOutcome::Exhausted);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert!(job.failed_at.is_some());
    }

    #[test]
    fn attempt_counters_saturate_at_the_top() {
        let mut job = running_job(u32::MAX);
        job.attempts = u32::MAX - 1;
        assert_eq!(
            job.fail("boom", Utc::now()).unwrap(),
            FailureOutcome::Retry { attempt: u32::MAX }
        );
        assert_eq!(job.attempts, u32::MAX);

        job.start("worker-1", Utc::now(), Utc::now()).unwrap();
        assert_eq!(job.fail("boom", Utc::now()).unwrap(), FailureOutcome::Exhausted);
        assert_eq!(job.attempts, u32::MAX);
    }

    #[test]
    fn zero_retries_fails_on_first_error() {
        let mut job = running_job(0);
        assert_eq!(job.fail("nope", Utc::now()).unwrap(), FailureOutcome::Exhausted);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn retry_resets_attempts_from_any_state() {
        let mut job = running_job(0);
        job.fail("nope", Utc::now()).unwrap();
        job.cancel(Utc::now());
        assert_eq!(job.status, JobStatus::Cancelled);

        job.reset_for_retry(Utc::now());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
        assert!(job.failed_at.is_none());
    }

    #[test]
    fn record_serializes_type_field() {
        let job = Job::new("email", json!({"to": "a@b.com"}));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "email");
        assert_eq!(value["status"], "queued");
        assert!(value.get("lease").is_none());

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn scores_keep_millisecond_precision() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(score_of(at), 1_700_000_000.123);
        assert_eq!(time_of(score_of(at)), at);
    }
}
