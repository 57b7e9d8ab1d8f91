//! Durable queue domain types.

use serde::{Deserialize, Serialize};

use crate::{JobId, JobState};

/// An entry on the durable queue.
///
/// The queue only stores job identifiers; the job record store owns
/// everything else. `position` is a monotonic ULID string that defines the
/// FIFO order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub position: String,
}

/// Statistics for the job system's current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Number of queued jobs.
    pub queued: u64,
    /// Number of pending (dispatched) jobs.
    pub pending: u64,
    /// Number of completed jobs.
    pub completed: u64,
    /// Number of failed jobs.
    pub failed: u64,
    /// Number of entries currently on the durable queue.
    pub depth: u64,
}

impl QueueStats {
    /// Record a count for a job state.
    pub fn set(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Queued => self.queued = count,
            JobState::Pending => self.pending = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
        }
    }

    /// Jobs not yet finished (queued + pending).
    pub fn active(&self) -> u64 {
        self.queued + self.pending
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_totals() {
        let mut stats = QueueStats::default();
        assert_eq!(stats.success_rate(), None);

        stats.set(JobState::Queued, 2);
        stats.set(JobState::Pending, 1);
        stats.set(JobState::Completed, 3);
        stats.set(JobState::Failed, 1);

        assert_eq!(stats.active(), 3);
        assert_eq!(stats.processed(), 4);
        assert_eq!(stats.success_rate(), Some(75.0));
    }
}
