//! The durable job queue (C3): kind-tagged jobs, priority + delay, retry with
//! backoff, and a Redis-backed dead-letter sink.

pub mod dead_letter;
pub mod job;
pub mod queue;
pub mod retry;

pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use job::{
    Backoff, BackoffKind, EnqueueOptions, GrowthEventType, JobId, JobPayload, JobPriority,
    JobRecord, JobStatus, MaintenanceType, SYSTEM_CAMPAIGN,
};
pub use queue::{FailOutcome, JobQueue, QueueCounts};
pub use retry::calculate_delay_ms;

use serde::{Deserialize, Serialize};

pub type JobProcessingResult<T> = Result<T, JobError>;

/// Leaf error type for the job subsystem. `thiserror`-derived, scoped to this
/// module's concerns, and convertible into the crate-root [`crate::Error`].
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum JobError {
    #[error("queue backing store error: {0}")]
    Queue(String),

    #[error("job payload could not be decoded: {0}")]
    BadPayload(String),

    #[error("unrecognized job kind: {0}")]
    UnknownKind(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job execution failed: {0}")]
    Execution(String),
}

/// Outcome a [`JobHandler`] returns for a dequeued job (§4.2/§4.6.4).
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Success,
    Retry(String),
    Terminal(String),
}
