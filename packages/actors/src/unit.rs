//! Execution units: one OS thread and one single-threaded runtime each.

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use futures_util::FutureExt;
use job_core::{JobContext, JobFailure, JobOutput, WorkerId};
use ractor::ActorRef;
use tokio::sync::mpsc;

use crate::messages::{JobCall, PoolMessage, UnitCommand, UnitReport};
use crate::registry::{JobBody, JobRegistry};

/// Handle the pool keeps for each unit.
///
/// Dropping the handle closes the command channel; the unit finishes its
/// current job and exits.
pub(crate) struct UnitHandle {
    commands: mpsc::UnboundedSender<UnitCommand>,
    join: thread::JoinHandle<()>,
}

impl UnitHandle {
    /// Spawn a unit thread reporting to `pool`.
    pub(crate) fn spawn(
        id: WorkerId,
        registry: Arc<JobRegistry>,
        pool: ActorRef<PoolMessage>,
    ) -> io::Result<Self> {
        let (commands, inbox) = mpsc::unbounded_channel();

        let join = thread::Builder::new()
            .name(id.to_string())
            .spawn(move || unit_main(id, registry, pool, inbox))?;

        Ok(Self { commands, join })
    }

    /// Forward a command; gives it back if the unit is gone.
    pub(crate) fn send(&self, command: UnitCommand) -> Result<(), UnitCommand> {
        self.commands.send(command).map_err(|e| e.0)
    }

    /// Whether the unit's thread is still running.
    pub(crate) fn is_alive(&self) -> bool {
        !self.join.is_finished() && !self.commands.is_closed()
    }
}

/// Reports `Exited` however the unit's thread ends.
struct ExitGuard {
    id: WorkerId,
    pool: ActorRef<PoolMessage>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        tracing::debug!("{} exiting", self.id);
        let _ = self.pool.send_message(PoolMessage::Report {
            worker_id: self.id,
            report: UnitReport::Exited,
        });
    }
}

fn unit_main(
    id: WorkerId,
    registry: Arc<JobRegistry>,
    pool: ActorRef<PoolMessage>,
    mut inbox: mpsc::UnboundedReceiver<UnitCommand>,
) {
    let _guard = ExitGuard {
        id,
        pool: pool.clone(),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("{} failed to build its runtime: {}", id, e);
            return;
        }
    };

    runtime.block_on(async move {
        let mut unit = ExecutionUnit {
            id,
            registry,
            pool,
            resolved: HashMap::new(),
        };

        while let Some(command) = inbox.recv().await {
            match command {
                UnitCommand::Start => unit.report(UnitReport::Idle),
                UnitCommand::Call(call) => unit.invoke(call).await,
            }
        }
    });
}

struct ExecutionUnit {
    id: WorkerId,
    registry: Arc<JobRegistry>,
    pool: ActorRef<PoolMessage>,
    /// Bodies already looked up by this unit.
    resolved: HashMap<String, Arc<dyn JobBody>>,
}

impl ExecutionUnit {
    fn report(&self, report: UnitReport) {
        if let Err(e) = self.pool.send_message(PoolMessage::Report {
            worker_id: self.id,
            report,
        }) {
            tracing::debug!("{} could not report to the pool: {}", self.id, e);
        }
    }

    fn resolve(&mut self, name: &str) -> Option<Arc<dyn JobBody>> {
        if let Some(body) = self.resolved.get(name) {
            return Some(body.clone());
        }

        let body = self.registry.get(name)?;
        self.resolved.insert(name.to_string(), body.clone());
        Some(body)
    }

    async fn invoke(&mut self, call: JobCall) {
        self.report(UnitReport::Working);
        tracing::debug!("{} running {} from {}", self.id, call.name, call.module);

        let started = Instant::now();
        let outcome = match self.resolve(&call.name) {
            Some(body) => {
                let context = JobContext {
                    worker_id: self.id,
                    job_name: call.name.clone(),
                };
                let args = call.args;

                match AssertUnwindSafe(async move { body.run(args, context).await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(err)) => {
                        Err(JobFailure::new(err.to_string()).with_trace(format!("{err:?}")))
                    }
                    Err(panic) => Err(JobFailure::new(panic_message(panic.as_ref()))),
                }
            }
            None => Err(JobFailure::new(format!("Unknown job: {}", call.name))),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => self.report(UnitReport::Success(JobOutput {
                duration_ms,
                result,
            })),
            Err(failure) => {
                tracing::debug!("{} job {} failed: {}", self.id, call.name, failure);
                self.report(UnitReport::Error {
                    duration_ms,
                    failure,
                })
            }
        }

        self.report(UnitReport::Idle);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Job panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Job panicked: {}", message)
    } else {
        "Job panicked".to_string()
    }
}
