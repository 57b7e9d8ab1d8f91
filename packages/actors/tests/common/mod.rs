#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use job_actors::{JobRegistry, JobSystem, SchedulerConfig, WorkerPool};
use job_core::{Job, JobDefinition, JobId, JobState};
use job_db::{Database, DbConfig};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub const ECHO: JobDefinition = JobDefinition::new("echo", module_path!());
pub const FAIL: JobDefinition = JobDefinition::new("fail", module_path!());
pub const PANIC: JobDefinition = JobDefinition::new("panic", module_path!());
pub const GATED: JobDefinition = JobDefinition::new("gated", module_path!());
pub const WHOAMI: JobDefinition = JobDefinition::new("whoami", module_path!());

/// Long enough that only explicit ticks run during a test.
pub const MANUAL_TICKS: Duration = Duration::from_secs(3600);

const WAIT: Duration = Duration::from_secs(10);

/// Registry of test bodies. `gated` blocks until a permit is added to `gate`.
pub fn registry(gate: Arc<Semaphore>) -> JobRegistry {
    let mut registry = JobRegistry::new();

    registry
        .register_fn(ECHO, |args, _ctx| async move { Ok(Value::Array(args)) })
        .register_fn(FAIL, |args, _ctx| async move {
            Err::<Value, _>(anyhow::anyhow!("boom after {} args", args.len()))
        })
        .register_fn(PANIC, |_args, _ctx| async move {
            if true {
                panic!("body blew up");
            }
            Ok(Value::Null)
        })
        .register_fn(GATED, move |args, _ctx| {
            let gate = gate.clone();
            async move {
                gate.acquire().await?.forget();
                Ok::<_, anyhow::Error>(Value::Array(args))
            }
        })
        .register_fn(WHOAMI, |_args, ctx| async move {
            Ok(Value::from(ctx.worker_id.0))
        });

    registry
}

pub async fn setup_db() -> Result<Database, Box<dyn Error>> {
    Ok(job_db::init(&DbConfig::memory()).await?)
}

pub async fn setup_pool(
    workers: usize,
) -> Result<(WorkerPool, Arc<Semaphore>), Box<dyn Error>> {
    let gate = Arc::new(Semaphore::new(0));
    let (pool, _handle) = WorkerPool::create(workers, Arc::new(registry(gate.clone()))).await?;
    wait_for_available(&pool, workers).await?;
    Ok((pool, gate))
}

pub async fn setup_system_on(
    db: Database,
    workers: usize,
    tick_interval: Duration,
) -> Result<(JobSystem, Arc<Semaphore>), Box<dyn Error>> {
    let gate = Arc::new(Semaphore::new(0));
    let config = SchedulerConfig::default()
        .with_workers(workers)
        .with_tick_interval(tick_interval);
    let system = JobSystem::create(db, registry(gate.clone()), config).await?;
    wait_for_available(system.pool(), workers).await?;
    Ok((system, gate))
}

pub async fn setup_system(
    workers: usize,
) -> Result<(JobSystem, Arc<Semaphore>), Box<dyn Error>> {
    setup_system_on(setup_db().await?, workers, MANUAL_TICKS).await
}

/// Poll until the pool reports `count` available units.
pub async fn wait_for_available(pool: &WorkerPool, count: usize) -> Result<(), Box<dyn Error>> {
    let deadline = Instant::now() + WAIT;
    loop {
        if pool.available().await? == count {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(format!("pool never reached {} available workers", count).into());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until job `id` is in `state`.
pub async fn wait_for_job(
    system: &JobSystem,
    id: JobId,
    state: JobState,
) -> Result<Job, Box<dyn Error>> {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(job) = system.get_job(id).await?
            && job.state == state
        {
            return Ok(job);
        }
        if Instant::now() >= deadline {
            return Err(format!("job {} never reached {}", id, state).into());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
