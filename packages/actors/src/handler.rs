//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sentinel_core::{Job, JobResult};

/// Result type for job handlers. The error string becomes the job's
/// `last_error`.
pub type HandlerResult = Result<JobResult, String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific type are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// The job type this handler processes.
    fn job_type(&self) -> &str;

    /// Process a job and return the result.
    fn handle(&self, job: &Job) -> HandlerFuture;
}

/// Registry for job handlers.
///
/// Maps job types to their handlers for dynamic dispatch.
#[derive(Default, Clone)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let job_type = handler.job_type().to_string();
        self.handlers.insert(job_type, Arc::new(handler));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<H: JobHandler>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a handler exists for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// List all registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    job_type: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(job_type: impl Into<String>, handler: F) -> Self {
        Self {
            job_type: job_type.into(),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn handle(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Helper macro for creating job handlers from async blocks.
///
/// The job is cloned into the future, so the body owns it.
#[macro_export]
macro_rules! job_handler {
    ($job_type:expr, |$job:ident| $body:expr) => {
        $crate::FnHandler::new($job_type, |$job: &$crate::Job| -> $crate::HandlerFuture {
            let $job = $job.clone();
            Box::pin(async move {
                let result: $crate::HandlerResult = $body;
                result
            })
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_dispatches_by_type() {
        let registry = JobHandlerRegistry::new()
            .with(crate::job_handler!("echo", |job| {
                Ok(JobResult::with_output("echoed", job.payload))
            }))
            .with(crate::job_handler!("fail", |_job| Err("boom".into())));

        assert_eq!(registry.job_types(), vec!["echo", "fail"]);
        assert!(registry.has_handler("echo"));
        assert!(registry.get("missing").is_none());

        let job = Job::new("echo", json!({"n": 1}));
        let echo = registry.get("echo").map(|h| h.handle(&job));
        let result = match echo {
            Some(fut) => fut.await,
            None => panic!("echo handler missing"),
        };
        assert_eq!(result, Ok(JobResult::with_output("echoed", json!({"n": 1}))));

        let failed = match registry.get("fail") {
            Some(handler) => handler.handle(&job).await,
            None => panic!("fail handler missing"),
        };
        assert_eq!(failed, Err("boom".to_string()));
    }
}
