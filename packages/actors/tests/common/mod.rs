#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use sentinel_actors::{
    FnHandler, HandlerFuture, HandlerResult, Job, JobHandlerRegistry, JobResult, JobService, JobStatus,
    QueueContext, WorkerConfig,
};
use sentinel_db::{MemoryStore, Store, StoreError, StoreResult, keys};
use serde_json::Value;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Memory store whose operations can be made to fail on demand.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    down: AtomicBool,
    reads: AtomicBool,
    job_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation.
    pub fn set_down(&self, down: bool) {
        self.faults.down.store(down, Ordering::SeqCst);
    }

    /// Fail only job-table reads.
    pub fn set_fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::SeqCst);
    }

    /// Fail only writes to the job table.
    pub fn set_fail_job_writes(&self, fail: bool) {
        self.faults.job_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.faults.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        Ok(())
    }

    fn check_read(&self) -> StoreResult<()> {
        self.check()?;
        if self.faults.reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }
}

impl Store for FlakyStore {
    async fn hash_set(&self, table: &str, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        if table == keys::JOBS && self.faults.job_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        self.inner.hash_set(table, key, value).await
    }

    async fn hash_set_if_absent(
        &self,
        table: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.hash_set_if_absent(table, key, value).await
    }

    async fn hash_get(&self, table: &str, key: &str) -> StoreResult<Option<String>> {
        self.check_read()?;
        self.inner.hash_get(table, key).await
    }

    async fn hash_get_all(&self, table: &str) -> StoreResult<Vec<(String, String)>> {
        self.check_read()?;
        self.inner.hash_get_all(table).await
    }

    async fn hash_remove(&self, table: &str, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.hash_remove(table, key).await
    }

    async fn list_push(&self, list: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.list_push(list, value).await
    }

    async fn list_pop_front(&self, list: &str) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.list_pop_front(list).await
    }

    async fn list_len(&self, list: &str) -> StoreResult<usize> {
        self.check()?;
        self.inner.list_len(list).await
    }

    async fn zset_add(&self, set: &str, member: &str, score: f64) -> StoreResult<()> {
        self.check()?;
        self.inner.zset_add(set, member, score).await
    }

    async fn zset_pop_min(&self, set: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        self.check()?;
        self.inner.zset_pop_min(set, count).await
    }

    async fn zset_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.zset_remove(set, member).await
    }

    async fn zset_len(&self, set: &str) -> StoreResult<usize> {
        self.check()?;
        self.inner.zset_len(set).await
    }
}

/// Handler that succeeds and counts its invocations.
pub fn counting_handler(
    job_type: &str,
    calls: Arc<AtomicUsize>,
) -> FnHandler<impl Fn(&Job) -> HandlerFuture + Send + Sync + 'static> {
    FnHandler::new(job_type, move |job: &Job| -> HandlerFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        let to = job.payload.get("to").cloned().unwrap_or(Value::Null);
        let result: HandlerResult = Ok(JobResult::with_output("sent", to));
        Box::pin(async move { result })
    })
}

/// Handler that always fails.
pub fn failing_handler(
    job_type: &str,
) -> FnHandler<impl Fn(&Job) -> HandlerFuture + Send + Sync + 'static> {
    FnHandler::new(job_type, |_job: &Job| -> HandlerFuture {
        Box::pin(async move {
            let result: HandlerResult = Err("Intentional failure".to_string());
            result
        })
    })
}

/// Handler that sleeps for `payload.millis`.
pub fn sleeping_handler(
    job_type: &str,
) -> FnHandler<impl Fn(&Job) -> HandlerFuture + Send + Sync + 'static> {
    FnHandler::new(job_type, |job: &Job| -> HandlerFuture {
        let millis = job.payload.get("millis").and_then(Value::as_u64).unwrap_or(10);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            let result: HandlerResult = Ok(JobResult::new(format!("Slept for {millis}ms")));
            result
        })
    })
}

pub fn registry_with(calls: Arc<AtomicUsize>) -> JobHandlerRegistry {
    JobHandlerRegistry::new()
        .with(counting_handler("email", calls))
        .with(failing_handler("fail"))
        .with(sleeping_handler("sleep"))
}

/// Worker settings with short intervals for tests.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig::default().with_poll_interval(Duration::from_millis(10))
}

pub fn context<S: Store>(store: S) -> QueueContext<S> {
    QueueContext::new(store)
}

/// Poll `get` until the job reaches `status` or `timeout` passes.
pub async fn wait_for_status<S: Store>(
    service: &JobService<S>,
    job: sentinel_actors::JobId,
    status: JobStatus,
    timeout: Duration,
) -> Result<Job, Box<dyn Error>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = service.get(job).await?;
        if current.status == status {
            return Ok(current);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!(
                "job {job} still {} after {timeout:?}, wanted {status}",
                current.status
            )
            .into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
