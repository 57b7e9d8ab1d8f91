//! Core domain types for the background job system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobState and JobDefinition for units of work
//! - QueueEntry and QueueStats for the durable queue
//! - WorkerId, WorkerState and the execution payloads exchanged with workers

mod execution;
mod job;
mod queue;
mod worker;

pub use execution::{JobContext, JobFailure, JobOutput};
pub use job::{Job, JobDefinition, JobId, JobState, ParseJobStateError};
pub use queue::{QueueEntry, QueueStats};
pub use worker::{WorkerId, WorkerInfo, WorkerState};
