//! Names of the logical structures shared by every process.

/// Job table: job id -> JSON record.
pub const JOBS: &str = "jobs";

/// FIFO of job ids eligible for immediate execution.
pub const READY_QUEUE: &str = "ready_queue";

/// Job ids scored by due time (epoch seconds).
pub const SCHEDULED: &str = "scheduled_zset";

/// Job ids of running jobs scored by lease expiry (epoch seconds).
pub const LEASES: &str = "lease_zset";

/// Idempotency key -> job id.
pub const IDEMPOTENCY: &str = "idempotency_keys";
