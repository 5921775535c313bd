//! Observability hooks for the queue engine.
//!
//! Components hold an `Arc<dyn Metrics>` handed to them at construction.
//! Every call is fire-and-forget.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, with_local_recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

/// Counters and histograms recorded by the engine.
pub trait Metrics: Send + Sync + 'static {
    fn job_submitted(&self) {}
    fn job_enqueued(&self) {}
    fn job_executed(&self) {}
    fn job_failed(&self) {}
    fn error(&self) {}
    fn enqueue_latency(&self, _elapsed: Duration) {}
    fn execution_latency(&self, _elapsed: Duration) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

const JOBS_SUBMITTED: &str = "jobs_submitted_total";
const JOBS_ENQUEUED: &str = "jobs_enqueued_total";
const JOBS_EXECUTED: &str = "jobs_executed_total";
const JOBS_FAILED: &str = "jobs_failed_total";
const ERRORS: &str = "error_count";
const ENQUEUE_LATENCY: &str = "enqueue_latency_seconds";
const EXECUTION_LATENCY: &str = "execution_latency_seconds";

/// Upper bounds (seconds) of the latency histogram buckets.
const BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Count and sum of a latency histogram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_seconds: f64,
}

/// Point-in-time copy of [`QueueMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_enqueued: u64,
    pub jobs_executed: u64,
    pub jobs_failed: u64,
    pub errors: u64,
    pub enqueue_latency: HistogramSnapshot,
    pub execution_latency: HistogramSnapshot,
}

/// Prometheus-backed registry owned by one node.
///
/// Records through a local recorder, so several registries can live in the
/// same process without touching the global one.
pub struct QueueMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueueMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMetrics").finish_non_exhaustive()
    }
}

impl QueueMetrics {
    pub fn new() -> Self {
        let builder = match PrometheusBuilder::new().set_buckets(&BUCKETS) {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to summary latencies");
                PrometheusBuilder::new()
            }
        };
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        with_local_recorder(&recorder, || {
            describe_counter!(JOBS_SUBMITTED, "Jobs submitted");
            describe_counter!(JOBS_ENQUEUED, "Jobs pushed to the ready queue");
            describe_counter!(JOBS_EXECUTED, "Jobs executed successfully");
            describe_counter!(JOBS_FAILED, "Failed execution attempts");
            describe_counter!(ERRORS, "Errors");
            describe_histogram!(ENQUEUE_LATENCY, "Time to enqueue a job");
            describe_histogram!(EXECUTION_LATENCY, "Job execution time");

            // Register every series so the exposition lists zeros too.
            for name in [JOBS_SUBMITTED, JOBS_ENQUEUED, JOBS_EXECUTED, JOBS_FAILED, ERRORS] {
                counter!(name).absolute(0);
            }
        });

        Self { recorder, handle }
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Current values, read back from the rendered exposition.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let text = self.render();
        let value = |name: &str| sample(&text, name).unwrap_or(0.0);
        let latency = |name: &str| HistogramSnapshot {
            count: value(&format!("{name}_count")) as u64,
            sum_seconds: value(&format!("{name}_sum")),
        };

        MetricsSnapshot {
            jobs_submitted: value(JOBS_SUBMITTED) as u64,
            jobs_enqueued: value(JOBS_ENQUEUED) as u64,
            jobs_executed: value(JOBS_EXECUTED) as u64,
            jobs_failed: value(JOBS_FAILED) as u64,
            errors: value(ERRORS) as u64,
            enqueue_latency: latency(ENQUEUE_LATENCY),
            execution_latency: latency(EXECUTION_LATENCY),
        }
    }

    fn increment(&self, name: &'static str) {
        with_local_recorder(&self.recorder, || counter!(name).increment(1));
    }

    fn observe(&self, name: &'static str, elapsed: Duration) {
        with_local_recorder(&self.recorder, || {
            histogram!(name).record(elapsed.as_secs_f64())
        });
    }
}

impl Metrics for QueueMetrics {
    fn job_submitted(&self) {
        self.increment(JOBS_SUBMITTED);
    }

    fn job_enqueued(&self) {
        self.increment(JOBS_ENQUEUED);
    }

    fn job_executed(&self) {
        self.increment(JOBS_EXECUTED);
    }

    fn job_failed(&self) {
        self.increment(JOBS_FAILED);
    }

    fn error(&self) {
        self.increment(ERRORS);
    }

    fn enqueue_latency(&self, elapsed: Duration) {
        self.observe(ENQUEUE_LATENCY, elapsed);
    }

    fn execution_latency(&self, elapsed: Duration) {
        self.observe(EXECUTION_LATENCY, elapsed);
    }
}

/// Value of the unlabelled sample `name` in an exposition.
fn sample(text: &str, name: &str) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            (series == name).then(|| value.parse().ok()).flatten()
        })
}
