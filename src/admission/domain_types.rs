//! Domain types for the admission queue: task identity, priority, and the
//! snapshots returned by `status`/`details` (§4.2).

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use crate::domain_types::ParticipantName;

/// Unique identifier for an admission task.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into
))]
pub struct AdmissionTaskId(Uuid);

impl AdmissionTaskId {
    /// Generates a new random task id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Admission priority score: higher is scheduled earlier. Default 5 (§4.2).
#[nutype(
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Into
    ),
    default = 5
)]
pub struct TaskPriority(i64);

/// Errors internal to the admission queue that do not map onto a shared
/// [`crate::error::Error`] kind named in the taxonomy (§7).
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// `enqueue` was called after `shutdown`.
    #[error("admission queue scheduler is no longer running")]
    SchedulerStopped,
}

/// Immutable snapshot returned by `AdmissionQueue::status`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueStatus {
    /// Tasks waiting in the heap.
    pub waiting: usize,
    /// Tasks whose producer is currently executing.
    pub in_flight: usize,
    /// `waiting * avg_processing_time / max_concurrent`, in milliseconds.
    pub estimated_wait_ms: u64,
}

/// Where a task currently sits in its lifecycle, as reported by `details`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Sitting in the waiting heap, not yet promoted.
    Waiting,
    /// Its producer is currently executing.
    InFlight,
}

/// Per-task snapshot returned by `AdmissionQueue::details`.
#[derive(Debug, Clone)]
pub struct TaskDetail {
    /// The task's identity.
    pub id: AdmissionTaskId,
    /// Current lifecycle state.
    pub state: TaskState,
    /// How long ago the task was originally enqueued, in milliseconds.
    pub age_ms: u64,
    /// The task's priority score.
    pub priority: TaskPriority,
    /// How many times this task has been retried so far.
    pub retry_count: u32,
}

/// Rolling statistics maintained by the scheduler (§4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueStatistics {
    /// Exponential moving average of time spent waiting, in milliseconds.
    pub avg_wait_ms: f64,
    /// Exponential moving average of producer execution time, in milliseconds.
    pub avg_processing_ms: f64,
    /// Total tasks ever enqueued.
    pub total: u64,
    /// Tasks that resolved successfully.
    pub completed: u64,
    /// Tasks that exhausted their retry budget.
    pub failed: u64,
    /// The highest waiting-heap depth observed so far.
    pub peak_queue_depth: usize,
}

impl Default for QueueStatistics {
    fn default() -> Self {
        Self {
            avg_wait_ms: 0.0,
            avg_processing_ms: 0.0,
            total: 0,
            completed: 0,
            failed: 0,
            peak_queue_depth: 0,
        }
    }
}

/// Smoothing factor for the processing/wait-time exponential moving
/// averages, mirroring the teacher's EMA-based router statistics.
pub const EMA_ALPHA: f64 = 0.2;

impl QueueStatistics {
    pub(crate) fn record_wait(&mut self, wait_ms: u64) {
        self.avg_wait_ms = ema(self.avg_wait_ms, wait_ms as f64);
    }

    pub(crate) fn record_processing(&mut self, processing_ms: u64) {
        self.avg_processing_ms = ema(self.avg_processing_ms, processing_ms as f64);
    }

    pub(crate) fn record_enqueued(&mut self, queue_depth: usize) {
        self.total += 1;
        self.peak_queue_depth = self.peak_queue_depth.max(queue_depth);
    }

    pub(crate) fn record_completed(&mut self) {
        self.completed += 1;
    }

    pub(crate) fn record_failed(&mut self) {
        self.failed += 1;
    }
}

fn ema(current: f64, sample: f64) -> f64 {
    if current == 0.0 {
        sample
    } else {
        EMA_ALPHA.mul_add(sample - current, current)
    }
}

/// Default estimated duration used when a caller does not supply one.
#[must_use]
pub fn default_estimated_duration() -> Duration {
    Duration::from_millis(1_000)
}
