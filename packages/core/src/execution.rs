//! Payloads exchanged between the dispatcher and execution units.

use serde::{Deserialize, Serialize};

use crate::WorkerId;

/// Context handed to a job body alongside its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobContext {
    /// The execution unit running the body.
    pub worker_id: WorkerId,
    /// Registry name of the body being run.
    pub job_name: String,
}

/// Successful outcome of one job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Wall-clock time spent in the body.
    pub duration_ms: u64,
    /// Value returned by the body.
    pub result: serde_json::Value,
}

/// Structured failure reported by an execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    /// Short description, persisted on the job record.
    pub message: String,
    /// Cause chain and backtrace, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}
