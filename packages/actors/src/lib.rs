//! Actor system for background jobs.
//!
//! This crate provides the Ractor-based execution side of the job system:
//! a pool of isolated execution units and the scheduler that feeds it from
//! the durable queue.
//!
//! # Architecture
//!
//! - `JobSystem` - Facade constructed once at startup
//! - `SchedulerActor` - Periodic tick: pop, resolve, dispatch, persist
//! - `PoolActor` - Owns the execution units and the available/working sets
//! - Execution units - One OS thread with its own runtime per unit
//!
//! # Usage
//!
//! ```ignore
//! use job_actors::{JobRegistry, JobSystem, SchedulerConfig};
//! use job_core::JobDefinition;
//!
//! const ECHO: JobDefinition = JobDefinition::new("echo", module_path!());
//!
//! let mut registry = JobRegistry::new();
//! registry.register_fn(ECHO, |args, _ctx| async move { Ok(args.into()) });
//!
//! let db = job_db::init(&job_db::DbConfig::memory()).await?;
//! let system = JobSystem::create(db, registry, SchedulerConfig::default()).await?;
//! system.start().await?;
//! let id = system.enqueue(&ECHO, ("hello",)).await?;
//! ```

mod messages;
mod pool;
mod registry;
mod scheduler;
mod system;
mod unit;

pub use messages::{
    DispatchError, ExecutionError, ExecutionResult, JobCall, JobSystemError, PoolMessage,
    SchedulerMessage, UnitCommand, UnitReport,
};
pub use pool::{Execution, PoolActor, PoolSnapshot, WorkerPool, default_worker_count};
pub use registry::{FnJob, JobBody, JobFuture, JobRegistry};
pub use scheduler::{DropReason, RecoveryReport, SchedulerActor, TickOutcome};
pub use system::{JobSystem, REMOVED_FROM_QUEUE, SchedulerConfig, positional_args};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
