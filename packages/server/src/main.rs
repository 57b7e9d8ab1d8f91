//! Background job server.
//!
//! Connects to the database, starts the job system with the demo job bodies
//! and runs until interrupted.

mod config;
mod jobs;

use std::time::Duration;

use job_actors::JobSystem;
use crate::config::{ServerConfig, log_filter};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

fn init_tracing() {
    let filter = log_filter(|name| std::env::var(name).ok());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env()?;
    tracing::info!("Starting job server: {:?}", config);

    let db = job_db::init(&config.db).await?;
    let system = JobSystem::create(db, jobs::registry(), config.scheduler.clone()).await?;

    let report = system.start().await?;
    if !report.requeued.is_empty() {
        tracing::warn!("Requeued {} jobs interrupted by a crash", report.requeued.len());
    }

    if config.demo {
        let id = system.enqueue(&jobs::BUSY_BOX, ()).await?;
        tracing::info!("Enqueued demo job {}", id);
    }

    let mut stats = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = stats.tick() => match system.stats().await {
                Ok(s) => tracing::info!(
                    queued = s.queued,
                    pending = s.pending,
                    completed = s.completed,
                    failed = s.failed,
                    depth = s.depth,
                    "Job stats"
                ),
                Err(e) => tracing::warn!("Failed to read job stats: {}", e),
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    system.shutdown().await?;
    Ok(())
}
