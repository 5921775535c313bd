//! Queue engine and actor runtime.
//!
//! This crate provides the job lifecycle on top of a [`sentinel_db::Store`]
//! and the Ractor-based runtime that drives it.
//!
//! # Architecture
//!
//! - `JobService` - submit, get, list, cancel and retry
//! - `Promoter` / `PromoterActor` - moves due scheduled jobs to the ready
//!   queue and reaps expired leases
//! - `Worker` / `WorkerActor` - claims and executes jobs
//! - `Supervisor` - spawns the replicas of a node and restarts failed ones
//!
//! # Usage
//!
//! ```ignore
//! use sentinel_actors::{QueueContext, JobService, SubmitRequest, SupervisorArgs, start_supervisor};
//!
//! let ctx = QueueContext::new(MemoryStore::new());
//! let (supervisor, handle) =
//!     start_supervisor(SupervisorArgs::new(ctx.clone(), handlers, RuntimeConfig::default())).await?;
//!
//! let service = JobService::new(ctx);
//! let submission = service.submit(SubmitRequest::new("email", payload)).await?;
//! ```

mod config;
mod context;
mod error;
mod handler;
mod messages;
pub mod metrics;
mod promoter;
mod service;
mod supervisor;
mod worker;

pub use config::{PromoterConfig, RuntimeConfig, WorkerConfig};
pub use context::QueueContext;
pub use error::{JobError, ServiceResult};
pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry};
pub use messages::{PromoterMessage, SupervisorMessage, SupervisorStatus, WorkerMessage};
pub use metrics::{Metrics, MetricsSnapshot, NoopMetrics, QueueMetrics};
pub use promoter::{LEASE_EXPIRED, Promoter, PromoterActor, TickReport};
pub use service::{JobService, SubmitRequest, Submission};
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use worker::{PollOutcome, Worker, WorkerActor};

/// Re-export core types used in handler signatures.
pub use sentinel_core::{Job, JobEvent, JobId, JobResult, JobStatus};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
