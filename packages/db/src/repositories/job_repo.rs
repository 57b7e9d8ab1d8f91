//! Job repository: the job record store.

use chrono::{DateTime, Utc};
use job_core::{Job, JobId, JobState, QueueStats};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::{Database, DbError};

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct JobRecord {
    id: Thing,
    name: String,
    module: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
    state: JobState,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn into_job(self) -> Result<Job, DbError> {
        let raw = self.id.id.to_raw();
        let id = JobId::parse(&raw)
            .map_err(|e| DbError::Serialization(format!("Invalid job id {}: {}", raw, e)))?;

        Ok(Job {
            id,
            name: self.name,
            module: self.module,
            args: self.args,
            state: self.state,
            message: self.message,
            duration_ms: self.duration_ms,
            result: self.result,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Struct for creating jobs - the id lives in the record key.
#[derive(Debug, Serialize)]
struct JobCreate {
    name: String,
    module: String,
    args: Vec<serde_json::Value>,
    state: JobState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Partial update applied to a job record.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl JobUpdate {
    /// Only change the state.
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Mark the job completed.
    pub fn completed(duration_ms: u64, result: serde_json::Value) -> Self {
        Self {
            state: Some(JobState::Completed),
            duration_ms: Some(duration_ms),
            result: Some(result),
            ..Default::default()
        }
    }

    /// Mark the job failed.
    pub fn failed(duration_ms: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            state: Some(JobState::Failed),
            message: Some(message.into()),
            duration_ms,
            ..Default::default()
        }
    }

    /// Serialize into a merge patch that also bumps `updated_at`.
    fn into_patch(self) -> Result<serde_json::Value, DbError> {
        let mut patch =
            serde_json::to_value(self).map_err(|e| DbError::Serialization(e.to_string()))?;
        patch["updated_at"] = serde_json::json!(Utc::now());
        Ok(patch)
    }
}

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub name: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobFilter {
    /// Filter by state only.
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new queued job in the database.
    pub async fn create(
        &self,
        name: impl Into<String>,
        module: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Result<Job, DbError> {
        let job = Job::new(name, module, args);
        let content = JobCreate {
            name: job.name.clone(),
            module: job.module.clone(),
            args: job.args.clone(),
            state: job.state,
            created_at: job.created_at,
            updated_at: job.updated_at,
        };

        let record: Option<JobRecord> = self
            .db
            .create(("job", job.id.to_string()))
            .content(content)
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .into_job()
    }

    /// Get a job by ID.
    pub async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;

        record.map(JobRecord::into_job).transpose()
    }

    /// Apply an unconditional update to a job.
    pub async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self
            .db
            .update(("job", id.to_string()))
            .merge(update.into_patch()?)
            .await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))?
            .into_job()
    }

    /// Apply an update only if the job is currently in state `from`.
    ///
    /// Returns `None` when the job does not exist or is in another state.
    pub async fn transition(
        &self,
        id: JobId,
        from: JobState,
        update: JobUpdate,
    ) -> Result<Option<Job>, DbError> {
        if let Some(to) = update.state
            && !from.can_transition_to(to)
        {
            return Err(DbError::Query(format!(
                "Illegal job transition {} -> {}",
                from, to
            )));
        }

        let mut result = self
            .db
            .query("UPDATE type::thing('job', $id) MERGE $patch WHERE state = $from RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("patch", update.into_patch()?))
            .bind(("from", from))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        records.into_iter().next().map(JobRecord::into_job).transpose()
    }

    /// List jobs with optional filtering, oldest first.
    pub async fn find_many(&self, filter: JobFilter) -> Result<Vec<Job>, DbError> {
        let mut conditions = Vec::new();
        let mut bindings: Vec<(&'static str, serde_json::Value)> = Vec::new();

        if let Some(state) = &filter.state {
            conditions.push("state = $state");
            bindings.push(("state", serde_json::json!(state)));
        }

        if let Some(name) = &filter.name {
            conditions.push("name = $name");
            bindings.push(("name", serde_json::json!(name)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let offset_clause = filter
            .offset
            .map(|o| format!("START {}", o))
            .unwrap_or_default();

        // ULID record keys sort by creation time
        let query = format!(
            "SELECT * FROM job {} ORDER BY id ASC {} {}",
            where_clause, limit_clause, offset_clause
        );

        let mut result = self.db.query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<JobRecord> = response.take(0)?;

        records.into_iter().map(JobRecord::into_job).collect()
    }

    /// Count jobs per state. `depth` is left at zero.
    pub async fn count_by_state(&self) -> Result<QueueStats, DbError> {
        let mut result = self
            .db
            .query("SELECT state, count() AS count FROM job GROUP BY state")
            .await?;

        #[derive(Deserialize)]
        struct StateCount {
            state: JobState,
            count: i64,
        }

        let counts: Vec<StateCount> = result.take(0)?;

        let mut stats = QueueStats::default();
        for count in counts {
            stats.set(count.state, count.count.max(0) as u64);
        }

        Ok(stats)
    }
}
