//! Errors surfaced by the request-style operations.

use sentinel_core::{JobId, TransitionError};
use sentinel_db::StoreError;

/// Error type for job operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Handler failed: {0}")]
    HandlerFailure(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Idempotency key {0} is reserved by a job that is not visible yet")]
    IdempotencyConflict(String),
}

/// Result type for job operations.
pub type ServiceResult<T> = Result<T, JobError>;
