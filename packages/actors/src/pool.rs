//! Worker pool actor owning a fixed set of execution units.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use job_core::{JobFailure, WorkerId, WorkerInfo, WorkerState};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::messages::{
    DispatchError, ExecutionError, ExecutionResult, JobCall, JobSystemError, PoolMessage,
    UnitCommand, UnitReport, ask,
};
use crate::registry::JobRegistry;
use crate::unit::UnitHandle;

/// Default unit count: hardware threads minus one, at least one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |n| n.get().saturating_sub(1))
        .max(1)
}

/// Point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Units ready for a call, in id order.
    pub available: Vec<WorkerId>,
    /// Units starting, busy, settling or stopped, in id order.
    pub working: Vec<WorkerId>,
    /// Units with an attached continuation.
    pub in_flight: usize,
    /// Total units owned by the pool.
    pub size: usize,
}

impl PoolSnapshot {
    /// Check that `available` and `working` partition every unit.
    pub fn is_partitioned(&self) -> bool {
        let disjoint = self.available.iter().all(|id| !self.working.contains(id));
        disjoint && self.available.len() + self.working.len() == self.size
    }
}

/// Per-unit bookkeeping held by the pool.
struct UnitSlot {
    handle: UnitHandle,
    state: WorkerState,
    /// Settled when the unit reports the outcome of its current call.
    continuation: Option<oneshot::Sender<ExecutionResult>>,
}

/// Which side of the partition a report moves a unit to.
enum Placement {
    Available,
    Working,
    Unchanged,
}

/// State for the pool actor.
pub struct PoolState {
    units: BTreeMap<WorkerId, UnitSlot>,
    available: BTreeSet<WorkerId>,
    working: BTreeSet<WorkerId>,
}

impl PoolState {
    fn place(&mut self, worker_id: WorkerId, placement: Placement) {
        match placement {
            Placement::Available => {
                self.working.remove(&worker_id);
                self.available.insert(worker_id);
            }
            Placement::Working => {
                self.available.remove(&worker_id);
                self.working.insert(worker_id);
            }
            Placement::Unchanged => {}
        }
    }

    fn dispatch(
        &mut self,
        call: JobCall,
        done: oneshot::Sender<ExecutionResult>,
    ) -> Result<WorkerId, DispatchError> {
        let Some(worker_id) = self.available.first().copied() else {
            return Err(DispatchError::NoUnitAvailable);
        };

        let Some(slot) = self.units.get_mut(&worker_id) else {
            self.available.remove(&worker_id);
            return Err(DispatchError::UnitUnavailable(worker_id));
        };

        if !slot.handle.is_alive() || slot.handle.send(UnitCommand::Call(call)).is_err() {
            tracing::warn!("{} is gone, retiring it", worker_id);
            slot.state = WorkerState::Stopped;
            self.place(worker_id, Placement::Working);
            return Err(DispatchError::UnitUnavailable(worker_id));
        }

        slot.state = WorkerState::Working;
        slot.continuation = Some(done);
        self.place(worker_id, Placement::Working);

        Ok(worker_id)
    }

    fn apply(&mut self, worker_id: WorkerId, report: UnitReport) {
        let Some(slot) = self.units.get_mut(&worker_id) else {
            tracing::warn!("Report from unknown unit {}: {:?}", worker_id, report);
            return;
        };

        if slot.state == WorkerState::Stopped {
            tracing::debug!("Ignoring report from stopped {}: {:?}", worker_id, report);
            return;
        }

        let placement = match report {
            UnitReport::Idle => {
                if let Some(continuation) = slot.continuation.take() {
                    tracing::warn!("{} went idle without an outcome", worker_id);
                    let _ = continuation.send(Err(ExecutionError::Failed(JobFailure::new(
                        "unit returned to idle without reporting an outcome",
                    ))));
                }
                slot.state = WorkerState::Idle;
                Placement::Available
            }
            UnitReport::Working => {
                slot.state = WorkerState::Working;
                Placement::Working
            }
            UnitReport::Success(output) => {
                slot.state = WorkerState::Success;
                match slot.continuation.take() {
                    Some(continuation) => {
                        let _ = continuation.send(Ok(output));
                    }
                    None => tracing::warn!("{} reported success with nothing waiting", worker_id),
                }
                Placement::Unchanged
            }
            UnitReport::Error { failure, .. } => {
                slot.state = WorkerState::Error;
                match slot.continuation.take() {
                    Some(continuation) => {
                        let _ = continuation.send(Err(ExecutionError::Failed(failure)));
                    }
                    None => tracing::warn!("{} reported failure with nothing waiting", worker_id),
                }
                Placement::Unchanged
            }
            UnitReport::Exited => {
                tracing::warn!("{} exited", worker_id);
                slot.state = WorkerState::Stopped;
                if let Some(continuation) = slot.continuation.take() {
                    let _ = continuation.send(Err(ExecutionError::Abandoned(worker_id)));
                }
                Placement::Working
            }
        };

        self.place(worker_id, placement);
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            available: self.available.iter().copied().collect(),
            working: self.working.iter().copied().collect(),
            in_flight: self
                .units
                .values()
                .filter(|slot| slot.continuation.is_some())
                .count(),
            size: self.units.len(),
        }
    }
}

/// Pool actor arguments.
pub struct PoolArgs {
    pub size: usize,
    pub registry: Arc<JobRegistry>,
}

/// Pool actor that owns the execution units.
pub struct PoolActor;

impl Actor for PoolActor {
    type Msg = PoolMessage;
    type State = PoolState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        if args.size == 0 {
            return Err(ActorProcessingErr::from(
                "Worker pool needs at least one worker",
            ));
        }

        tracing::info!("Starting worker pool with {} workers", args.size);

        let mut state = PoolState {
            units: BTreeMap::new(),
            available: BTreeSet::new(),
            working: BTreeSet::new(),
        };

        for n in 1..=args.size {
            let worker_id = WorkerId(n as u32);
            let handle = UnitHandle::spawn(worker_id, args.registry.clone(), myself.clone())
                .map_err(|e| {
                    ActorProcessingErr::from(format!("Failed to spawn {}: {}", worker_id, e))
                })?;

            if handle.send(UnitCommand::Start).is_err() {
                return Err(ActorProcessingErr::from(format!(
                    "{} exited before start",
                    worker_id
                )));
            }

            state.units.insert(
                worker_id,
                UnitSlot {
                    handle,
                    state: WorkerState::Starting,
                    continuation: None,
                },
            );
            state.working.insert(worker_id);
        }

        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::Execute { call, done, reply } => {
                let _ = reply.send(state.dispatch(call, done));
            }

            PoolMessage::Report { worker_id, report } => {
                state.apply(worker_id, report);
            }

            PoolMessage::Available { reply } => {
                let _ = reply.send(state.available.len());
            }

            PoolMessage::ListWorkers { reply } => {
                let workers = state
                    .units
                    .iter()
                    .map(|(id, slot)| WorkerInfo {
                        id: *id,
                        state: slot.state,
                    })
                    .collect();
                let _ = reply.send(workers);
            }

            PoolMessage::Snapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!("Stopping worker pool");
        // Closing the command channels lets each unit finish and exit
        state.available.clear();
        state.working.clear();
        state.units.clear();
        Ok(())
    }
}

/// Handle to a running pool.
#[derive(Clone)]
pub struct WorkerPool {
    actor: ActorRef<PoolMessage>,
    size: usize,
}

impl WorkerPool {
    /// Spawn the pool actor and its `size` units.
    pub async fn create(
        size: usize,
        registry: Arc<JobRegistry>,
    ) -> Result<(Self, JoinHandle<()>), ractor::SpawnErr> {
        let (actor, handle) = Actor::spawn(None, PoolActor, PoolArgs { size, registry }).await?;

        Ok((Self { actor, size }, handle))
    }

    /// Hand a call to the first available unit.
    ///
    /// Fails immediately when every unit is busy; nothing is queued.
    pub async fn execute(&self, call: JobCall) -> Result<Execution, DispatchError> {
        let (done, outcome) = oneshot::channel();

        let worker_id = ask(&self.actor, |reply| PoolMessage::Execute { call, done, reply })
            .await
            .map_err(|_| DispatchError::PoolStopped)??;

        Ok(Execution { worker_id, outcome })
    }

    /// Number of units ready for a call.
    pub async fn available(&self) -> Result<usize, JobSystemError> {
        ask(&self.actor, |reply| PoolMessage::Available { reply }).await
    }

    /// Every unit with its last reported state, in id order.
    pub async fn list_workers(&self) -> Result<Vec<WorkerInfo>, JobSystemError> {
        ask(&self.actor, |reply| PoolMessage::ListWorkers { reply }).await
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot, JobSystemError> {
        ask(&self.actor, |reply| PoolMessage::Snapshot { reply }).await
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop the pool actor. Units finish their current job, then exit.
    pub fn shutdown(&self) {
        self.actor.stop(None);
    }
}

/// A dispatched call, resolved when its unit reports an outcome.
#[derive(Debug)]
pub struct Execution {
    worker_id: WorkerId,
    outcome: oneshot::Receiver<ExecutionResult>,
}

impl Execution {
    /// The unit running the call.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }
}

impl Future for Execution {
    type Output = ExecutionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let worker_id = self.worker_id;
        Pin::new(&mut self.outcome)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ExecutionError::Abandoned(worker_id))))
    }
}
