//! Core domain types for the job queue.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and the lifecycle transitions
//! - Events for lifecycle observers
//! - Score helpers mapping timestamps to sorted-set scores

mod events;
mod job;

pub use events::JobEvent;
pub use job::{
    DEFAULT_MAX_RETRIES, FailureOutcome, Job, JobId, JobResult, JobStatus, Lease,
    TransitionError, score_of, time_of,
};
