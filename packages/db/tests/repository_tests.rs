#![allow(clippy::disallowed_methods)]

mod common;

use job_core::{JobId, JobState};
use serde_json::{Value, json};
use std::error::Error;

use job_db::repositories::{JobFilter, JobRepository, JobUpdate, QueueRepository};

#[tokio::test]
async fn test_job_repository() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    // create/find_by_id
    let job = jobs
        .create("echo", "jobs/echo", vec![json!("hi"), json!({"n": 1})])
        .await?;
    assert_eq!(job.state, JobState::Queued);
    assert_eq!(job.name, "echo");

    let loaded = jobs.find_by_id(job.id).await?.ok_or("job missing")?;
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.module, "jobs/echo");
    assert_eq!(loaded.args, vec![json!("hi"), json!({"n": 1})]);
    assert!(loaded.message.is_none());

    assert!(jobs.find_by_id(JobId::new()).await?.is_none());

    // transition only applies from the expected state
    let pending = jobs
        .transition(job.id, JobState::Queued, JobUpdate::state(JobState::Pending))
        .await?
        .ok_or("transition refused")?;
    assert_eq!(pending.state, JobState::Pending);
    assert!(pending.updated_at >= job.updated_at);

    let again = jobs
        .transition(job.id, JobState::Queued, JobUpdate::state(JobState::Pending))
        .await?;
    assert!(again.is_none());

    let missing = jobs
        .transition(JobId::new(), JobState::Queued, JobUpdate::state(JobState::Pending))
        .await?;
    assert!(missing.is_none());

    let completed = jobs
        .transition(
            job.id,
            JobState::Pending,
            JobUpdate::completed(42, json!({"ok": true})),
        )
        .await?
        .ok_or("completion refused")?;
    assert_eq!(completed.state, JobState::Completed);
    assert_eq!(completed.duration_ms, Some(42));
    assert_eq!(completed.result, Some(json!({"ok": true})));

    // illegal edges are rejected before touching the store
    let illegal = jobs
        .transition(job.id, JobState::Completed, JobUpdate::state(JobState::Queued))
        .await;
    assert!(illegal.is_err());

    // unconditional update
    let other = jobs.create("fail", "jobs/fail", Vec::new()).await?;
    let failed = jobs
        .update(other.id, JobUpdate::failed(Some(7), "boom"))
        .await?;
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.message.as_deref(), Some("boom"));
    assert_eq!(failed.args, Vec::<Value>::new());

    Ok(())
}

#[tokio::test]
async fn test_job_listing_and_counts() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let first = jobs.create("echo", "jobs/echo", vec![json!(1)]).await?;
    let second = jobs.create("echo", "jobs/echo", vec![json!(2)]).await?;
    let third = jobs.create("sleep", "jobs/sleep", vec![json!(3)]).await?;

    jobs.transition(second.id, JobState::Queued, JobUpdate::state(JobState::Pending))
        .await?;
    jobs.transition(third.id, JobState::Queued, JobUpdate::failed(None, "removed"))
        .await?;

    let all = jobs.find_many(JobFilter::default()).await?;
    let ids: Vec<JobId> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);

    let queued = jobs.find_many(JobFilter::state(JobState::Queued)).await?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, first.id);

    let echoes = jobs
        .find_many(JobFilter {
            name: Some("echo".to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(echoes.len(), 2);

    let limited = jobs
        .find_many(JobFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        })
        .await?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, second.id);

    let stats = jobs.count_by_state().await?;
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.depth, 0);

    Ok(())
}

#[tokio::test]
async fn test_queue_fifo() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let queue = QueueRepository::new(db);

    assert!(queue.is_empty().await?);
    assert_eq!(queue.pop().await?, None);

    let ids: Vec<JobId> = (0..4).map(|_| JobId::new()).collect();
    for id in &ids {
        queue.push(*id).await?;
    }

    assert_eq!(queue.len().await?, 4);
    assert!(queue.contains(ids[2]).await?);
    assert!(!queue.contains(JobId::new()).await?);

    // range follows inclusive, tail-relative indexing
    assert_eq!(queue.range(0, -1).await?, ids);
    assert_eq!(queue.range(1, 2).await?, ids[1..=2].to_vec());
    assert_eq!(queue.range(-2, -1).await?, ids[2..].to_vec());
    assert!(queue.range(3, 1).await?.is_empty());

    assert_eq!(queue.pop().await?, Some(ids[0]));
    assert_eq!(queue.pop().await?, Some(ids[1]));
    assert!(!queue.contains(ids[0]).await?);
    assert_eq!(queue.len().await?, 2);

    // re-pushed ids go to the tail
    queue.push(ids[0]).await?;
    assert_eq!(queue.range(0, -1).await?, vec![ids[2], ids[3], ids[0]]);

    Ok(())
}

#[tokio::test]
async fn test_queue_clear() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let queue = QueueRepository::new(db);

    let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
    for id in &ids {
        queue.push(*id).await?;
    }

    let removed = queue.clear().await?;
    assert_eq!(removed, ids);
    assert!(queue.is_empty().await?);
    assert_eq!(queue.pop().await?, None);
    assert!(queue.clear().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_queue_survives_new_handles() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;

    let id = JobId::new();
    QueueRepository::new(db.clone()).push(id).await?;

    let reopened = QueueRepository::new(db);
    assert_eq!(reopened.range(0, -1).await?, vec![id]);

    Ok(())
}
