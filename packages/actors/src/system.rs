//! Job system facade: wires the repositories, pool and scheduler together.

use std::sync::Arc;
use std::time::Duration;

use job_core::{Job, JobDefinition, JobId, JobState, QueueStats, WorkerInfo};
use job_db::Database;
use job_db::repositories::{JobFilter, JobRepository, JobUpdate, QueueRepository};
use ractor::{Actor, ActorRef};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::messages::{JobSystemError, SchedulerMessage, ask};
use crate::pool::{WorkerPool, default_worker_count};
use crate::registry::JobRegistry;
use crate::scheduler::{RecoveryReport, SchedulerActor, SchedulerArgs, TickOutcome};

/// Message persisted on jobs removed by [`JobSystem::clear_queue`].
pub const REMOVED_FROM_QUEUE: &str = "removed from queue";

/// Scheduler and pool settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between scheduler ticks.
    pub tick_interval: Duration,
    /// Number of execution units.
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            workers: default_worker_count(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Spread a serialized argument value into positional arguments.
///
/// `null` means no arguments, an array is spread, anything else is a single
/// argument.
pub fn positional_args(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// The background job system.
///
/// Owns one worker pool and one scheduler over a shared database handle.
/// The database must already carry the schema (see [`job_db::init`]).
pub struct JobSystem {
    jobs: JobRepository,
    queue: QueueRepository,
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    scheduler: ActorRef<SchedulerMessage>,
    handles: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Build the pool and scheduler. The scheduler is not started.
    pub async fn create(
        db: Database,
        registry: JobRegistry,
        config: SchedulerConfig,
    ) -> Result<Self, JobSystemError> {
        tracing::info!(
            "Creating job system with {} workers and {} job bodies",
            config.workers,
            registry.len()
        );

        let registry = Arc::new(registry);
        let jobs = JobRepository::new(db.clone());
        let queue = QueueRepository::new(db);

        let (pool, pool_handle) = WorkerPool::create(config.workers, registry.clone()).await?;

        let args = SchedulerArgs {
            jobs: jobs.clone(),
            queue: queue.clone(),
            pool: pool.clone(),
            registry: registry.clone(),
            tick_interval: config.tick_interval,
        };

        let (scheduler, scheduler_handle) = match Actor::spawn(None, SchedulerActor, args).await {
            Ok(spawned) => spawned,
            Err(e) => {
                pool.shutdown();
                let _ = pool_handle.await;
                return Err(e.into());
            }
        };

        Ok(Self {
            jobs,
            queue,
            registry,
            pool,
            scheduler,
            handles: vec![scheduler_handle, pool_handle],
        })
    }

    /// Record a new job and append it to the queue. Does not wait for it to
    /// run.
    pub async fn enqueue<A: Serialize>(
        &self,
        definition: &JobDefinition,
        args: A,
    ) -> Result<JobId, JobSystemError> {
        let args = positional_args(serde_json::to_value(args)?);

        if !self.registry.contains(definition.name) {
            tracing::warn!("Enqueueing {} which has no registered body", definition.name);
        }

        let job = self
            .jobs
            .create(definition.name, definition.module, args)
            .await?;
        self.queue.push(job.id).await?;

        tracing::info!("Enqueued job {} ({})", job.id, job.name);
        Ok(job.id)
    }

    /// Every execution unit with its last reported state.
    pub async fn list_workers(&self) -> Result<Vec<WorkerInfo>, JobSystemError> {
        self.pool.list_workers().await
    }

    /// Jobs oldest first, optionally filtered by state.
    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>, JobSystemError> {
        let filter = JobFilter {
            state,
            ..Default::default()
        };
        Ok(self.jobs.find_many(filter).await?)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobSystemError> {
        Ok(self.jobs.find_by_id(id).await?)
    }

    /// Ids on the queue, head first.
    pub async fn queued_ids(&self) -> Result<Vec<JobId>, JobSystemError> {
        Ok(self.queue.range(0, -1).await?)
    }

    /// Job counts per state plus queue depth.
    pub async fn stats(&self) -> Result<QueueStats, JobSystemError> {
        let mut stats = self.jobs.count_by_state().await?;
        stats.depth = self.queue.len().await?;
        Ok(stats)
    }

    /// Empty the queue and fail the jobs that were waiting on it.
    ///
    /// Returns the number of entries removed.
    pub async fn clear_queue(&self) -> Result<usize, JobSystemError> {
        let removed = self.queue.clear().await?;

        for id in &removed {
            self.jobs
                .transition(
                    *id,
                    JobState::Queued,
                    JobUpdate::failed(None, REMOVED_FROM_QUEUE),
                )
                .await?;
        }

        tracing::info!("Cleared {} jobs from the queue", removed.len());
        Ok(removed.len())
    }

    /// Run startup recovery, then start ticking. No-op when already running.
    pub async fn start(&self) -> Result<RecoveryReport, JobSystemError> {
        ask(&self.scheduler, |reply| SchedulerMessage::Start { reply }).await?
    }

    /// Stop ticking. Running jobs still finish and are persisted.
    pub async fn stop(&self) -> Result<(), JobSystemError> {
        ask(&self.scheduler, |reply| SchedulerMessage::Stop { reply }).await
    }

    /// Run one scheduler tick now.
    pub async fn tick(&self) -> Result<TickOutcome, JobSystemError> {
        ask(&self.scheduler, |reply| SchedulerMessage::Tick {
            reply: Some(reply),
        })
        .await?
    }

    pub async fn is_running(&self) -> Result<bool, JobSystemError> {
        ask(&self.scheduler, |reply| SchedulerMessage::IsRunning { reply }).await
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Stop the scheduler and the pool and wait for both actors to exit.
    pub async fn shutdown(self) -> Result<(), JobSystemError> {
        tracing::info!("Shutting down job system");

        self.stop().await?;
        self.scheduler.stop(None);
        self.pool.shutdown();

        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Actor task ended abnormally: {}", e);
            }
        }

        Ok(())
    }
}
