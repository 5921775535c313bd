//! Runtime tuning knobs.

use std::time::Duration;

/// Promoter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoterConfig {
    /// Pause between ticks.
    pub poll_interval: Duration,
    /// Members popped from the scheduled set per tick. Never below one.
    pub batch_size: usize,
    /// Also reap expired leases on every tick.
    pub reap_leases: bool,
}

impl Default for PromoterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
            reap_leases: true,
        }
    }
}

impl PromoterConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Zero is raised to one so a tick always makes progress.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_reap_leases(mut self, reap_leases: bool) -> Self {
        self.reap_leases = reap_leases;
        self
    }
}

/// Worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep after finding the ready queue empty.
    pub poll_interval: Duration,
    /// Upper bound on a single handler run.
    pub execution_timeout: Duration,
    /// Extra time past the execution timeout before a lease counts as expired.
    pub lease_grace: Duration,
    /// Base delay for automatic retries. Zero requeues immediately.
    pub retry_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            execution_timeout: Duration::from_secs(300),
            lease_grace: Duration::from_secs(30),
            retry_backoff: Duration::ZERO,
        }
    }
}

impl WorkerConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_execution_timeout(mut self, execution_timeout: Duration) -> Self {
        self.execution_timeout = execution_timeout;
        self
    }

    pub fn with_lease_grace(mut self, lease_grace: Duration) -> Self {
        self.lease_grace = lease_grace;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Lease duration granted at claim time.
    pub fn lease_duration(&self) -> Duration {
        self.execution_timeout.saturating_add(self.lease_grace)
    }

    /// Delay before retry `attempt` (1-based count of finished attempts).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.retry_backoff.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(1u32 << exponent)
    }
}

/// Replica counts and per-role settings for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub promoters: usize,
    pub workers: usize,
    pub promoter: PromoterConfig,
    pub worker: WorkerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            promoters: 1,
            workers: 4,
            promoter: PromoterConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_promoters(mut self, promoters: usize) -> Self {
        self.promoters = promoters;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_promoter(mut self, promoter: PromoterConfig) -> Self {
        self.promoter = promoter;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.promoters, 1);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.promoter.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.promoter.batch_size, 100);
        assert!(cfg.promoter.reap_leases);
        assert_eq!(cfg.worker.lease_duration(), Duration::from_secs(330));
    }

    #[test]
    fn zero_batch_size_is_raised_to_one() {
        assert_eq!(PromoterConfig::default().with_batch_size(0).batch_size, 1);
        assert_eq!(PromoterConfig::default().with_batch_size(7).batch_size, 7);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let cfg = WorkerConfig::default().with_retry_backoff(Duration::from_secs(2));
        assert_eq!(cfg.backoff_for(1), Duration::from_secs(2));
        assert_eq!(cfg.backoff_for(2), Duration::from_secs(4));
        assert_eq!(cfg.backoff_for(3), Duration::from_secs(8));
        assert_eq!(WorkerConfig::default().backoff_for(5), Duration::ZERO);
    }
}
