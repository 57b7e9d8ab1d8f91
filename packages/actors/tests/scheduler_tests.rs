#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use job_actors::{DropReason, REMOVED_FROM_QUEUE, TickOutcome};
use job_core::{JobDefinition, JobId, JobState, WorkerState};
use job_db::repositories::{JobRepository, JobUpdate, QueueRepository};
use serde_json::json;

fn dispatched(outcome: TickOutcome) -> Result<JobId, Box<dyn Error>> {
    match outcome {
        TickOutcome::Dispatched { job_id, .. } => Ok(job_id),
        other => Err(format!("expected a dispatch, got {:?}", other).into()),
    }
}

#[tokio::test]
async fn test_enqueue_is_visible_as_queued() -> Result<(), Box<dyn Error>> {
    let (system, _gate) = common::setup_system(1).await?;

    let id = system.enqueue(&common::ECHO, ("hello", 2)).await?;
    let no_args = system.enqueue(&common::ECHO, ()).await?;

    let jobs = system.list_jobs(None).await?;
    let job = jobs.iter().find(|j| j.id == id).ok_or("job not listed")?;
    assert_eq!(job.state, JobState::Queued);
    assert_eq!(job.name, "echo");
    assert_eq!(job.module, common::ECHO.module);
    assert_eq!(job.args, vec![json!("hello"), json!(2)]);

    let empty = system.get_job(no_args).await?.ok_or("job missing")?;
    assert!(empty.args.is_empty());

    assert_eq!(system.queued_ids().await?, vec![id, no_args]);

    let stats = system.stats().await?;
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.depth, 2);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_three_jobs_one_worker() -> Result<(), Box<dyn Error>> {
    let (system, gate) = common::setup_system(1).await?;

    let a = system.enqueue(&common::GATED, ("a",)).await?;
    let b = system.enqueue(&common::GATED, ("b",)).await?;
    let c = system.enqueue(&common::GATED, ("c",)).await?;

    assert_eq!(dispatched(system.tick().await?)?, a);
    assert_eq!(system.tick().await?, TickOutcome::NoCapacity);

    assert_eq!(system.list_jobs(Some(JobState::Pending)).await?.len(), 1);
    assert_eq!(system.list_jobs(Some(JobState::Queued)).await?.len(), 2);
    assert_eq!(system.queued_ids().await?, vec![b, c]);

    gate.add_permits(1);
    let done = common::wait_for_job(&system, a, JobState::Completed).await?;
    assert_eq!(done.result, Some(json!(["a"])));
    assert!(done.duration_ms.is_some());

    common::wait_for_available(system.pool(), 1).await?;
    assert_eq!(dispatched(system.tick().await?)?, b);
    assert_eq!(system.queued_ids().await?, vec![c]);

    gate.add_permits(2);
    common::wait_for_job(&system, b, JobState::Completed).await?;
    common::wait_for_available(system.pool(), 1).await?;
    assert_eq!(dispatched(system.tick().await?)?, c);
    common::wait_for_job(&system, c, JobState::Completed).await?;

    common::wait_for_available(system.pool(), 1).await?;
    assert_eq!(system.tick().await?, TickOutcome::QueueEmpty);

    let stats = system.stats().await?;
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.depth, 0);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_duration_counts_from_enqueue() -> Result<(), Box<dyn Error>> {
    let (system, gate) = common::setup_system(1).await?;
    let held = Duration::from_millis(300);

    let id = system.enqueue(&common::GATED, ("slow",)).await?;
    assert_eq!(dispatched(system.tick().await?)?, id);

    tokio::time::sleep(held).await;
    gate.add_permits(1);

    let job = common::wait_for_job(&system, id, JobState::Completed).await?;
    let duration_ms = job.duration_ms.ok_or("duration not recorded")?;
    assert!(duration_ms >= held.as_millis() as u64);

    let elapsed = (job.updated_at - job.created_at).num_milliseconds();
    assert!(duration_ms as i64 <= elapsed + 1000);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_dispatch_is_fifo() -> Result<(), Box<dyn Error>> {
    let (system, _gate) = common::setup_system(1).await?;

    let mut enqueued = Vec::new();
    for n in 0..5 {
        enqueued.push(system.enqueue(&common::ECHO, (n,)).await?);
    }

    let mut order = Vec::new();
    for _ in 0..enqueued.len() {
        common::wait_for_available(system.pool(), 1).await?;
        let id = dispatched(system.tick().await?)?;
        common::wait_for_job(&system, id, JobState::Completed).await?;
        order.push(id);
    }

    assert_eq!(order, enqueued);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_job_records_message() -> Result<(), Box<dyn Error>> {
    let (system, _gate) = common::setup_system(1).await?;

    let id = system.enqueue(&common::FAIL, (1, 2, 3)).await?;
    assert_eq!(dispatched(system.tick().await?)?, id);

    let job = common::wait_for_job(&system, id, JobState::Failed).await?;
    assert_eq!(job.message.as_deref(), Some("boom after 3 args"));
    assert!(job.duration_ms.is_some());
    assert!(job.result.is_none());

    common::wait_for_available(system.pool(), 1).await?;
    let workers = system.list_workers().await?;
    assert!(workers.iter().all(|w| w.state == WorkerState::Idle));

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_job_stays_queued_and_is_reoffered() -> Result<(), Box<dyn Error>> {
    let (system, _gate) = common::setup_system(1).await?;

    let ghost = JobDefinition::new("ghost", module_path!());
    let id = system.enqueue(&ghost, ()).await?;

    assert_eq!(
        system.tick().await?,
        TickOutcome::Dropped {
            job_id: id,
            reason: DropReason::UnknownJob("ghost".to_string()),
        }
    );

    let job = system.get_job(id).await?.ok_or("job missing")?;
    assert_eq!(job.state, JobState::Queued);
    assert!(system.queued_ids().await?.is_empty());

    let report = system.start().await?;
    assert_eq!(report.reconciled, vec![id]);
    assert!(report.requeued.is_empty());
    assert_eq!(system.queued_ids().await?, vec![id]);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_stale_queue_entries_are_dropped() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let (system, _gate) = common::setup_system_on(db.clone(), 1, common::MANUAL_TICKS).await?;
    let jobs = JobRepository::new(db.clone());
    let queue = QueueRepository::new(db);

    let orphan = JobId::new();
    queue.push(orphan).await?;
    assert_eq!(
        system.tick().await?,
        TickOutcome::Dropped {
            job_id: orphan,
            reason: DropReason::NotFound,
        }
    );

    let id = system.enqueue(&common::ECHO, ()).await?;
    jobs.transition(id, JobState::Queued, JobUpdate::failed(None, "cancelled"))
        .await?;
    assert_eq!(
        system.tick().await?,
        TickOutcome::Dropped {
            job_id: id,
            reason: DropReason::NotQueued,
        }
    );

    let job = system.get_job(id).await?.ok_or("job missing")?;
    assert_eq!(job.state, JobState::Failed);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_recovery_requeues_pending_jobs_once() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db.clone());
    let queue = QueueRepository::new(db.clone());

    // Crashed while running: pending and off the queue
    let running = jobs.create("echo", common::ECHO.module, vec![json!(1)]).await?;
    jobs.transition(running.id, JobState::Queued, JobUpdate::state(JobState::Pending))
        .await?;

    // Crashed mid-recovery: pending and already pushed back
    let half = jobs.create("echo", common::ECHO.module, vec![json!(2)]).await?;
    jobs.transition(half.id, JobState::Queued, JobUpdate::state(JobState::Pending))
        .await?;
    queue.push(half.id).await?;

    let (system, _gate) = common::setup_system_on(db.clone(), 1, common::MANUAL_TICKS).await?;
    let report = system.start().await?;
    assert_eq!(report.requeued.len(), 2);
    assert!(report.requeued.contains(&running.id));
    assert!(report.requeued.contains(&half.id));
    assert!(system.is_running().await?);

    // Starting again is a no-op
    assert_eq!(system.start().await?, Default::default());

    let queued = system.queued_ids().await?;
    assert_eq!(queued.len(), 2);
    assert_eq!(queued.iter().filter(|id| **id == running.id).count(), 1);
    assert_eq!(queued.iter().filter(|id| **id == half.id).count(), 1);
    for id in [running.id, half.id] {
        let job = system.get_job(id).await?.ok_or("job missing")?;
        assert_eq!(job.state, JobState::Queued);
    }

    system.shutdown().await?;

    // A second restart finds nothing to repair
    let (restarted, _gate) = common::setup_system_on(db, 1, common::MANUAL_TICKS).await?;
    let report = restarted.start().await?;
    assert!(report.requeued.is_empty());
    assert!(report.reconciled.is_empty());
    assert_eq!(restarted.queued_ids().await?.len(), 2);

    restarted.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_clear_queue_fails_waiting_jobs() -> Result<(), Box<dyn Error>> {
    let (system, _gate) = common::setup_system(1).await?;

    let first = system.enqueue(&common::ECHO, (1,)).await?;
    let second = system.enqueue(&common::ECHO, (2,)).await?;

    assert_eq!(system.clear_queue().await?, 2);
    assert!(system.queued_ids().await?.is_empty());
    assert_eq!(system.tick().await?, TickOutcome::QueueEmpty);

    for id in [first, second] {
        let job = system.get_job(id).await?.ok_or("job missing")?;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.message.as_deref(), Some(REMOVED_FROM_QUEUE));
    }

    // Cleared jobs are not resurrected by recovery
    let report = system.start().await?;
    assert!(report.reconciled.is_empty());

    let stats = system.stats().await?;
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.queued, 0);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_timer_drives_jobs_to_completion() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let (system, _gate) =
        common::setup_system_on(db, 2, Duration::from_millis(20)).await?;

    assert!(!system.is_running().await?);
    system.start().await?;

    let ids = vec![
        system.enqueue(&common::ECHO, ("x",)).await?,
        system.enqueue(&common::FAIL, ()).await?,
        system.enqueue(&common::ECHO, ("y",)).await?,
    ];

    common::wait_for_job(&system, ids[0], JobState::Completed).await?;
    common::wait_for_job(&system, ids[1], JobState::Failed).await?;
    common::wait_for_job(&system, ids[2], JobState::Completed).await?;

    system.stop().await?;
    assert!(!system.is_running().await?);

    let late = system.enqueue(&common::ECHO, ()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = system.get_job(late).await?.ok_or("job missing")?;
    assert_eq!(job.state, JobState::Queued);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_stop_lets_running_jobs_finish() -> Result<(), Box<dyn Error>> {
    let (system, gate) = common::setup_system(1).await?;
    system.start().await?;

    let id = system.enqueue(&common::GATED, ()).await?;
    assert_eq!(dispatched(system.tick().await?)?, id);

    system.stop().await?;
    gate.add_permits(1);

    common::wait_for_job(&system, id, JobState::Completed).await?;

    system.shutdown().await?;
    Ok(())
}
