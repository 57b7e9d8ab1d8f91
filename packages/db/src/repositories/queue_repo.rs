//! Queue repository: the durable FIFO list of job identifiers.

use std::sync::{LazyLock, Mutex, PoisonError};

use job_core::{JobId, QueueEntry};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use ulid::Generator;

use crate::{Database, DbError};

/// Monotonic source of queue positions shared by every repository in the
/// process, so entries pushed through different handles still sort FIFO.
static POSITIONS: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Attempts made by `pop` before giving up on a contended head.
const POP_ATTEMPTS: usize = 8;

/// Repository for durable queue operations.
#[derive(Clone)]
pub struct QueueRepository {
    db: Database,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct QueueEntryRecord {
    #[allow(dead_code)]
    id: Thing,
    job_id: String,
    position: String,
}

impl QueueEntryRecord {
    fn into_entry(self) -> Result<QueueEntry, DbError> {
        let job_id = JobId::parse(&self.job_id).map_err(|e| {
            DbError::Serialization(format!("Invalid queued job id {}: {}", self.job_id, e))
        })?;

        Ok(QueueEntry {
            job_id,
            position: self.position,
        })
    }
}

#[derive(Debug, Serialize)]
struct QueueEntryCreate {
    job_id: String,
    position: String,
}

fn next_position() -> Result<String, DbError> {
    let mut generator = POSITIONS.lock().unwrap_or_else(PoisonError::into_inner);
    generator
        .generate()
        .map(|ulid| ulid.to_string())
        .map_err(|e| DbError::Query(format!("Queue position overflow: {}", e)))
}

/// Resolve an inclusive `[start, stop]` range with negative indices counting
/// from the tail, into `(offset, count)` over a list of `len` items.
fn resolve_range(len: u64, start: i64, stop: i64) -> Option<(u64, u64)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if len == 0 || start > stop || start >= len {
        return None;
    }

    Some((start as u64, (stop - start + 1) as u64))
}

impl QueueRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a job id to the tail of the queue.
    pub async fn push(&self, job_id: JobId) -> Result<QueueEntry, DbError> {
        let position = next_position()?;
        let content = QueueEntryCreate {
            job_id: job_id.to_string(),
            position: position.clone(),
        };

        let record: Option<QueueEntryRecord> = self
            .db
            .create(("queue_entry", position))
            .content(content)
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to push queue entry".into()))?
            .into_entry()
    }

    /// Remove and return the head of the queue.
    ///
    /// Removal is a single-record delete; if another consumer removed the
    /// head first the next head is tried.
    pub async fn pop(&self) -> Result<Option<JobId>, DbError> {
        for _ in 0..POP_ATTEMPTS {
            let mut result = self
                .db
                .query("SELECT * FROM queue_entry ORDER BY position ASC LIMIT 1")
                .await?;
            let head: Vec<QueueEntryRecord> = result.take(0)?;

            let Some(head) = head.into_iter().next() else {
                return Ok(None);
            };

            let removed: Option<QueueEntryRecord> =
                self.db.delete(("queue_entry", head.position)).await?;

            if let Some(entry) = removed {
                return entry.into_entry().map(|e| Some(e.job_id));
            }

            tracing::debug!("Queue head taken by another consumer, retrying");
        }

        Err(DbError::Query("Queue pop kept losing the head".into()))
    }

    /// Entries between `start` and `stop` inclusive, in FIFO order.
    ///
    /// Negative indices count from the tail, so `range(0, -1)` is the whole
    /// queue.
    pub async fn range(&self, start: i64, stop: i64) -> Result<Vec<JobId>, DbError> {
        let Some((offset, count)) = resolve_range(self.len().await?, start, stop) else {
            return Ok(Vec::new());
        };

        let mut result = self
            .db
            .query("SELECT * FROM queue_entry ORDER BY position ASC LIMIT $limit START $start")
            .bind(("limit", count as i64))
            .bind(("start", offset as i64))
            .await?;

        let records: Vec<QueueEntryRecord> = result.take(0)?;

        records
            .into_iter()
            .map(|r| r.into_entry().map(|e| e.job_id))
            .collect()
    }

    /// Number of entries on the queue.
    pub async fn len(&self) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS count FROM queue_entry GROUP ALL")
            .await?;

        let counts: Vec<CountResult> = result.take(0)?;

        Ok(counts.first().map_or(0, |c| c.count.max(0) as u64))
    }

    /// Check whether the queue is empty.
    pub async fn is_empty(&self) -> Result<bool, DbError> {
        Ok(self.len().await? == 0)
    }

    /// Check whether a job id is currently on the queue.
    pub async fn contains(&self, job_id: JobId) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS count FROM queue_entry WHERE job_id = $job_id GROUP ALL")
            .bind(("job_id", job_id.to_string()))
            .await?;

        let counts: Vec<CountResult> = result.take(0)?;

        Ok(counts.first().is_some_and(|c| c.count > 0))
    }

    /// Remove every entry, returning the removed job ids in FIFO order.
    pub async fn clear(&self) -> Result<Vec<JobId>, DbError> {
        let mut result = self.db.query("DELETE queue_entry RETURN BEFORE").await?;
        let mut records: Vec<QueueEntryRecord> = result.take(0)?;

        records.sort_by(|a, b| a.position.cmp(&b.position));

        records
            .into_iter()
            .map(|r| r.into_entry().map(|e| e.job_id))
            .collect()
    }
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}
