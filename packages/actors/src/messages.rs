//! Message types for actor communication.

use chrono::{DateTime, Utc};
use job_core::{JobFailure, JobId, JobOutput, WorkerId, WorkerInfo};
use job_db::DbError;
use ractor::rpc::CallResult;
use ractor::{ActorRef, RpcReplyPort};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::pool::PoolSnapshot;
use crate::scheduler::{RecoveryReport, TickOutcome};

/// Outcome delivered to whoever awaits an execution.
pub type ExecutionResult = Result<JobOutput, ExecutionError>;

/// A job invocation forwarded to an execution unit.
#[derive(Debug, Clone)]
pub struct JobCall {
    pub name: String,
    pub module: String,
    pub args: Vec<Value>,
}

/// Commands sent from the pool to an execution unit.
#[derive(Debug)]
pub enum UnitCommand {
    /// Initialize; the unit answers with `Idle`.
    Start,
    /// Run one job body.
    Call(JobCall),
}

/// Lifecycle reports sent from an execution unit to the pool.
#[derive(Debug)]
pub enum UnitReport {
    Idle,
    Working,
    Success(JobOutput),
    Error { duration_ms: u64, failure: JobFailure },
    /// The unit's thread is gone.
    Exited,
}

/// Messages for the PoolActor.
#[derive(Debug)]
pub enum PoolMessage {
    /// Dispatch a call to the first available unit.
    Execute {
        call: JobCall,
        done: oneshot::Sender<ExecutionResult>,
        reply: RpcReplyPort<Result<WorkerId, DispatchError>>,
    },

    /// A unit reported a lifecycle event.
    Report {
        worker_id: WorkerId,
        report: UnitReport,
    },

    /// Count available units.
    Available { reply: RpcReplyPort<usize> },

    /// List units in id order.
    ListWorkers { reply: RpcReplyPort<Vec<WorkerInfo>> },

    /// Get the current partition.
    Snapshot { reply: RpcReplyPort<PoolSnapshot> },
}

/// Messages for the SchedulerActor.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Run startup recovery and start the tick timer.
    Start {
        reply: RpcReplyPort<Result<RecoveryReport, JobSystemError>>,
    },

    /// Stop the tick timer.
    Stop { reply: RpcReplyPort<()> },

    /// Run one tick. Timer ticks carry no reply port.
    Tick {
        reply: Option<RpcReplyPort<Result<TickOutcome, JobSystemError>>>,
    },

    /// A dispatched job settled.
    Finished {
        job_id: JobId,
        created_at: DateTime<Utc>,
        outcome: ExecutionResult,
    },

    /// Check whether the tick timer is running.
    IsRunning { reply: RpcReplyPort<bool> },
}

/// Error returned when a call cannot be handed to a unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("No workers available")]
    NoUnitAvailable,

    #[error("Worker {0} is no longer reachable")]
    UnitUnavailable(WorkerId),

    #[error("Worker pool is not running")]
    PoolStopped,
}

/// Error surfaced by an execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Failed(JobFailure),

    #[error("Worker {0} stopped before reporting an outcome")]
    Abandoned(WorkerId),
}

impl ExecutionError {
    /// Message persisted on the failed job.
    pub fn message(&self) -> String {
        match self {
            ExecutionError::Failed(failure) => failure.message.clone(),
            abandoned => abandoned.to_string(),
        }
    }
}

/// Error type for job system operations.
#[derive(Debug, thiserror::Error)]
pub enum JobSystemError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Failed to spawn actor: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Invalid job arguments: {0}")]
    Args(#[from] serde_json::Error),
}

/// Send a message carrying a reply port and wait for the answer.
pub(crate) async fn ask<M, T, F>(actor: &ActorRef<M>, build: F) -> Result<T, JobSystemError>
where
    M: ractor::Message,
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> M,
{
    // ractor::rpc::call returns Result<CallResult<T>, MessagingErr<M>>
    match ractor::rpc::call(actor, build, None).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(JobSystemError::Actor("Call timed out".into())),
        Ok(CallResult::SenderError) => {
            Err(JobSystemError::Actor("Actor dropped the reply".into()))
        }
        Err(e) => Err(JobSystemError::Actor(format!("Failed to send message: {}", e))),
    }
}
