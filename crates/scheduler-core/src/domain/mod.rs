//! Business-logic handlers the dispatcher (C4) routes reserved jobs to
//! (§4.6), one module per job-kind family. No direct teacher counterpart —
//! the teacher's order/inventory handlers are ecommerce-specific — but the
//! per-entity try/log/continue error-isolation idiom is the same one
//! `jobs/worker.rs` uses for a failed job in a batch.

pub mod deferred_effect;
pub mod event_expiration;
pub mod settlement;
pub mod structure;

use std::sync::Arc;

use crate::graphql::GraphQlClient;
use crate::jobs::{EnqueueOptions, JobQueue};

pub use crate::jobs::HandlerOutcome;

/// Dependencies every handler needs: the GraphQL client for reads/writes
/// against the simulation platform, and the queue to enqueue follow-up jobs.
#[derive(Clone)]
pub struct HandlerContext {
    pub graphql: Arc<GraphQlClient>,
    pub queue: Arc<JobQueue>,
    /// Base enqueue options (`max_attempts`/`backoff`) follow-up jobs start
    /// from, sourced from `QUEUE_MAX_RETRIES`/`QUEUE_RETRY_BACKOFF_MS` (§6).
    pub queue_defaults: EnqueueOptions,
}

impl HandlerContext {
    pub fn new(graphql: Arc<GraphQlClient>, queue: Arc<JobQueue>) -> Self {
        Self {
            graphql,
            queue,
            queue_defaults: EnqueueOptions::default(),
        }
    }

    pub fn with_queue_defaults(mut self, queue_defaults: EnqueueOptions) -> Self {
        self.queue_defaults = queue_defaults;
        self
    }
}

fn variable_f64(variables: &std::collections::HashMap<String, serde_json::Value>, key: &str, default: f64) -> f64 {
    variables.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

fn variable_i64(variables: &std::collections::HashMap<String, serde_json::Value>, key: &str) -> Option<i64> {
    variables.get(key).and_then(|v| v.as_i64())
}
