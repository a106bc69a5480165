//! Alerting (C9, §4.9): severity-tagged notifications fanned out to every
//! registered handler. Grounded on the teacher's `#[async_trait]` seams
//! (`PaymentGateway`, `JobHandler`) for the trait shape, and on
//! `jobs/worker.rs`'s use of `futures::future::join_all` for running several
//! independent async operations without letting one failure block the rest.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// One notification sink. Implementations must not let a downstream failure
/// (a webhook timing out, say) propagate past `notify` — `AlertManager`
/// already isolates handlers from each other, but a handler should still
/// report its own failure rather than panic.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn notify(&self, severity: Severity, title: &str, message: &str, metadata: &Value) -> Result<(), String>;
}

/// Writes a single structured log line per alert. Registered by default so
/// alerts are always visible even with no external handler configured.
pub struct LogHandler;

#[async_trait]
impl AlertHandler for LogHandler {
    async fn notify(&self, severity: Severity, title: &str, message: &str, metadata: &Value) -> Result<(), String> {
        match severity {
            Severity::Info => info!(severity = severity.as_str(), title, message, %metadata, "alert"),
            Severity::Warning => warn!(severity = severity.as_str(), title, message, %metadata, "alert"),
            Severity::Critical => error!(severity = severity.as_str(), title, message, %metadata, "alert"),
        }
        Ok(())
    }
}

/// Fans `send` out to every registered handler concurrently. A handler
/// erroring is logged, never propagated to the caller or to other handlers.
pub struct AlertManager {
    handlers: Vec<Arc<dyn AlertHandler>>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    pub fn new() -> Self {
        Self {
            handlers: vec![Arc::new(LogHandler)],
        }
    }

    pub fn with_handlers(handlers: Vec<Arc<dyn AlertHandler>>) -> Self {
        Self { handlers }
    }

    pub fn register(&mut self, handler: Arc<dyn AlertHandler>) {
        self.handlers.push(handler);
    }

    pub async fn send(&self, severity: Severity, title: impl Into<String>, message: impl Into<String>) {
        self.send_with_metadata(severity, title, message, Value::Null).await
    }

    pub async fn send_with_metadata(&self, severity: Severity, title: impl Into<String>, message: impl Into<String>, metadata: Value) {
        let title = title.into();
        let message = message.into();
        let results = join_all(
            self.handlers
                .iter()
                .map(|handler| handler.notify(severity, &title, &message, &metadata)),
        )
        .await;
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "alert handler failed");
            }
        }
    }
}
