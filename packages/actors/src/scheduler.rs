//! Scheduler actor bridging the durable queue and the worker pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use job_core::{JobId, JobState, WorkerId};
use job_db::repositories::{JobFilter, JobRepository, JobUpdate, QueueRepository};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::messages::{ExecutionResult, JobCall, JobSystemError, SchedulerMessage};
use crate::pool::WorkerPool;
use crate::registry::JobRegistry;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every unit is busy; the queue was not touched.
    NoCapacity,
    /// Nothing to dispatch.
    QueueEmpty,
    /// The job was marked pending and handed to a unit.
    Dispatched { job_id: JobId, worker_id: WorkerId },
    /// The popped id was abandoned for this tick.
    Dropped { job_id: JobId, reason: DropReason },
    /// The pool refused the call; the job went back on the queue.
    Requeued { job_id: JobId },
}

/// Why a popped id was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No job record with that id.
    NotFound,
    /// The job record is not `queued`.
    NotQueued,
    /// No body registered under the job's name. The job stays `queued`.
    UnknownJob(String),
}

/// Jobs put back on the queue by startup recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Orphaned `pending` jobs moved back to `queued`.
    pub requeued: Vec<JobId>,
    /// `queued` jobs that were missing from the queue.
    pub reconciled: Vec<JobId>,
}

/// Scheduler actor arguments.
pub struct SchedulerArgs {
    pub jobs: JobRepository,
    pub queue: QueueRepository,
    pub pool: WorkerPool,
    pub registry: Arc<JobRegistry>,
    pub tick_interval: Duration,
}

/// State for the scheduler actor.
pub struct SchedulerState {
    jobs: JobRepository,
    queue: QueueRepository,
    pool: WorkerPool,
    registry: Arc<JobRegistry>,
    tick_interval: Duration,
    /// Timer task; `Some` while the scheduler is running.
    ticker: Option<JoinHandle<()>>,
    /// Jobs dispatched by this scheduler that have not settled yet.
    in_flight: HashSet<JobId>,
}

impl SchedulerState {
    async fn tick(
        &mut self,
        myself: &ActorRef<SchedulerMessage>,
    ) -> Result<TickOutcome, JobSystemError> {
        if self.pool.available().await? == 0 {
            tracing::debug!("No workers available, skipping tick");
            return Ok(TickOutcome::NoCapacity);
        }

        let Some(job_id) = self.queue.pop().await? else {
            return Ok(TickOutcome::QueueEmpty);
        };

        let Some(job) = self.jobs.find_by_id(job_id).await? else {
            tracing::error!("Queued job {} has no record, dropping it", job_id);
            return Ok(TickOutcome::Dropped {
                job_id,
                reason: DropReason::NotFound,
            });
        };

        if job.state != JobState::Queued {
            tracing::warn!("Job {} is {}, not queued; dropping it", job_id, job.state);
            return Ok(TickOutcome::Dropped {
                job_id,
                reason: DropReason::NotQueued,
            });
        }

        if !self.registry.contains(&job.name) {
            tracing::error!("Job {} names unknown job body {}", job_id, job.name);
            return Ok(TickOutcome::Dropped {
                job_id,
                reason: DropReason::UnknownJob(job.name),
            });
        }

        let Some(job) = self
            .jobs
            .transition(job_id, JobState::Queued, JobUpdate::state(JobState::Pending))
            .await?
        else {
            tracing::warn!("Job {} changed state before dispatch", job_id);
            return Ok(TickOutcome::Dropped {
                job_id,
                reason: DropReason::NotQueued,
            });
        };

        let call = JobCall {
            name: job.name.clone(),
            module: job.module.clone(),
            args: job.args.clone(),
        };

        let execution = match self.pool.execute(call).await {
            Ok(execution) => execution,
            Err(e) => {
                tracing::warn!("Dispatch of job {} failed: {}; requeueing", job_id, e);
                self.jobs
                    .transition(job_id, JobState::Pending, JobUpdate::state(JobState::Queued))
                    .await?;
                self.queue.push(job_id).await?;
                return Ok(TickOutcome::Requeued { job_id });
            }
        };

        let worker_id = execution.worker_id();
        tracing::info!("Dispatched job {} ({}) to {}", job_id, job.name, worker_id);
        self.in_flight.insert(job_id);

        let scheduler = myself.clone();
        let created_at = job.created_at;
        tokio::spawn(async move {
            let outcome = execution.await;
            if scheduler
                .send_message(SchedulerMessage::Finished {
                    job_id,
                    created_at,
                    outcome,
                })
                .is_err()
            {
                tracing::warn!("Scheduler gone; job {} stays pending until recovery", job_id);
            }
        });

        Ok(TickOutcome::Dispatched { job_id, worker_id })
    }

    async fn finish(
        &mut self,
        job_id: JobId,
        created_at: DateTime<Utc>,
        outcome: ExecutionResult,
    ) -> Result<(), JobSystemError> {
        self.in_flight.remove(&job_id);

        let duration_ms = (Utc::now() - created_at).num_milliseconds().max(0) as u64;
        let update = match outcome {
            Ok(output) => JobUpdate::completed(duration_ms, output.result),
            Err(e) => JobUpdate::failed(Some(duration_ms), e.message()),
        };

        match self
            .jobs
            .transition(job_id, JobState::Pending, update)
            .await?
        {
            Some(job) => match job.message.as_deref() {
                Some(message) if job.state == JobState::Failed => {
                    tracing::info!("Job {} failed after {}ms: {}", job_id, duration_ms, message)
                }
                _ => tracing::info!("Job {} {} after {}ms", job_id, job.state, duration_ms),
            },
            None => tracing::warn!("Job {} settled but was no longer pending", job_id),
        }

        Ok(())
    }

    /// Put orphaned and missing jobs back on the queue.
    async fn recover(&mut self) -> Result<RecoveryReport, JobSystemError> {
        let mut report = RecoveryReport::default();

        for job in self.jobs.find_many(JobFilter::state(JobState::Pending)).await? {
            if self.in_flight.contains(&job.id) {
                continue;
            }

            // Queue entry first, then the state flip
            if !self.queue.contains(job.id).await? {
                self.queue.push(job.id).await?;
            }

            if self
                .jobs
                .transition(job.id, JobState::Pending, JobUpdate::state(JobState::Queued))
                .await?
                .is_some()
            {
                report.requeued.push(job.id);
            }
        }

        for job in self.jobs.find_many(JobFilter::state(JobState::Queued)).await? {
            if !self.queue.contains(job.id).await? {
                self.queue.push(job.id).await?;
                report.reconciled.push(job.id);
            }
        }

        tracing::info!(
            "Recovery requeued {} pending jobs and restored {} queue entries",
            report.requeued.len(),
            report.reconciled.len()
        );

        Ok(report)
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

fn spawn_ticker(scheduler: ActorRef<SchedulerMessage>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if scheduler
                .send_message(SchedulerMessage::Tick { reply: None })
                .is_err()
            {
                break;
            }
        }
    })
}

/// Scheduler actor driving the tick loop.
pub struct SchedulerActor;

impl Actor for SchedulerActor {
    type Msg = SchedulerMessage;
    type State = SchedulerState;
    type Arguments = SchedulerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting scheduler (tick every {}ms)",
            args.tick_interval.as_millis()
        );

        Ok(SchedulerState {
            jobs: args.jobs,
            queue: args.queue,
            pool: args.pool,
            registry: args.registry,
            tick_interval: args.tick_interval,
            ticker: None,
            in_flight: HashSet::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SchedulerMessage::Start { reply } => {
                if state.ticker.is_some() {
                    let _ = reply.send(Ok(RecoveryReport::default()));
                    return Ok(());
                }

                let result = state.recover().await;
                match &result {
                    Ok(_) => {
                        state.ticker = Some(spawn_ticker(myself.clone(), state.tick_interval));
                        tracing::info!("Scheduler started");
                    }
                    Err(e) => tracing::error!("Recovery failed, scheduler not started: {}", e),
                }
                let _ = reply.send(result);
            }

            SchedulerMessage::Stop { reply } => {
                if state.ticker.is_some() {
                    state.stop_ticker();
                    tracing::info!("Scheduler stopped");
                }
                let _ = reply.send(());
            }

            SchedulerMessage::Tick { reply } => {
                let result = state.tick(&myself).await;
                if let Err(e) = &result {
                    tracing::error!("Scheduler tick failed: {}", e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }

            SchedulerMessage::Finished {
                job_id,
                created_at,
                outcome,
            } => {
                if let Err(e) = state.finish(job_id, created_at, outcome).await {
                    tracing::error!("Failed to persist outcome of job {}: {}", job_id, e);
                }
            }

            SchedulerMessage::IsRunning { reply } => {
                let _ = reply.send(state.ticker.is_some());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.stop_ticker();
        Ok(())
    }
}
