//! Lifecycle events broadcast for observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// Events emitted as jobs move between queues and states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job record was created.
    Submitted {
        job_id: JobId,
        job_type: String,
        status: JobStatus,
        timestamp: DateTime<Utc>,
    },
    /// A due job moved from the scheduled set to the ready queue.
    Promoted {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job and started executing it.
    Started {
        job_id: JobId,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    Completed {
        job_id: JobId,
        worker_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// An attempt failed.
    Failed {
        job_id: JobId,
        error: String,
        attempts: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A running job's lease ran out before its worker reported back.
    LeaseExpired {
        job_id: JobId,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// An operator cancelled a job.
    Cancelled {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// An operator re-queued a job.
    Retried {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::Submitted { timestamp, .. }
            | JobEvent::Promoted { timestamp, .. }
            | JobEvent::Started { timestamp, .. }
            | JobEvent::Completed { timestamp, .. }
            | JobEvent::Failed { timestamp, .. }
            | JobEvent::LeaseExpired { timestamp, .. }
            | JobEvent::Cancelled { timestamp, .. }
            | JobEvent::Retried { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event.
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Submitted { job_id, .. }
            | JobEvent::Promoted { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::LeaseExpired { job_id, .. }
            | JobEvent::Cancelled { job_id, .. }
            | JobEvent::Retried { job_id, .. } => *job_id,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::Submitted {
                job_id,
                job_type,
                status,
                ..
            } => format!("Job {} ({}) submitted as {}", job_id, job_type, status),
            JobEvent::Promoted { job_id, .. } => format!("Job {} promoted", job_id),
            JobEvent::Started {
                job_id, worker_id, ..
            } => format!("Job {} started by {}", job_id, worker_id),
            JobEvent::Completed {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::Failed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            JobEvent::LeaseExpired {
                job_id, worker_id, ..
            } => format!("Job {} lease held by {} expired", job_id, worker_id),
            JobEvent::Cancelled { job_id, .. } => format!("Job {} cancelled", job_id),
            JobEvent::Retried { job_id, .. } => format!("Job {} re-queued", job_id),
        }
    }
}
