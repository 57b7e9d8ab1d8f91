//! Job domain types for units of background work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{LazyLock, Mutex, PoisonError};
use ulid::{Generator, Ulid};

static IDS: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    ///
    /// IDs created by one process are strictly increasing, even within the
    /// same millisecond.
    pub fn new() -> Self {
        let mut ids = IDS.lock().unwrap_or_else(PoisonError::into_inner);
        Self(ids.generate().unwrap_or_else(|_| Ulid::new()))
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
///
/// The only legal edges are `queued -> pending -> {completed, failed}`, plus
/// `pending -> queued` during startup recovery and `queued -> failed` when a
/// job is removed from the queue before it ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting on the durable queue.
    #[default]
    Queued,
    /// Dispatched to an execution unit (or orphaned by a crash).
    Pending,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 4] = [
        JobState::Queued,
        JobState::Pending,
        JobState::Completed,
        JobState::Failed,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Pending)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Pending, JobState::Completed)
                | (JobState::Pending, JobState::Failed)
                | (JobState::Pending, JobState::Queued)
        )
    }

    /// Get a simple state string for display and queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Pending => "pending",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a job state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct ParseJobStateError(pub String);

impl std::str::FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseJobStateError(s.to_string()))
    }
}

/// Static description of a kind of job: the registry key plus the module
/// that defines its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobDefinition {
    /// Name used to resolve the body in the job registry.
    pub name: &'static str,
    /// Stable reference to the module defining the body.
    pub module: &'static str,
}

impl JobDefinition {
    pub const fn new(name: &'static str, module: &'static str) -> Self {
        Self { name, module }
    }
}

/// A job represents a persisted unit of work executed by the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Registry name of the job body.
    pub name: String,
    /// Module reference of the job definition.
    pub module: String,
    /// Positional arguments passed to the body.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Current lifecycle state.
    pub state: JobState,
    /// Failure detail, set when the job fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds between enqueue and the terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Result returned by the body, set when the job completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            module: module.into(),
            args,
            state: JobState::Queued,
            message: None,
            duration_ms: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a new queued job for a definition.
    pub fn for_definition(definition: &JobDefinition, args: Vec<serde_json::Value>) -> Self {
        Self::new(definition.name, definition.module, args)
    }

    /// Milliseconds elapsed since the job was created.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_milliseconds().max(0) as u64
    }
}
