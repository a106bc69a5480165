//! §4.6.2: expire overdue events, either across every campaign (the
//! `SYSTEM` job) or for a single campaign on a reactive recalculation.

use futures::future::join_all;
use tracing::{error, warn};

use crate::graphql::GraphQlClient;
use crate::jobs::{HandlerOutcome, SYSTEM_CAMPAIGN};

const BATCH_SIZE: usize = 10;
const DEFAULT_GRACE_PERIOD_SECONDS: i64 = 5 * 60;

pub struct EventExpirationHandler {
    grace_period: chrono::Duration,
}

impl Default for EventExpirationHandler {
    fn default() -> Self {
        Self {
            grace_period: chrono::Duration::seconds(DEFAULT_GRACE_PERIOD_SECONDS),
        }
    }
}

impl EventExpirationHandler {
    /// `grace_period` must be non-negative (§4.6.2).
    pub fn with_grace_period(grace_period: chrono::Duration) -> Self {
        assert!(grace_period >= chrono::Duration::zero(), "grace period must be non-negative");
        Self { grace_period }
    }

    pub async fn handle(&self, graphql: &GraphQlClient, campaign_id: &str) -> HandlerOutcome {
        if campaign_id == SYSTEM_CAMPAIGN {
            let campaign_ids = match graphql.get_all_campaign_ids().await {
                Ok(ids) => ids,
                Err(e) => return HandlerOutcome::Retry(e.to_string()),
            };

            for id in &campaign_ids {
                if let HandlerOutcome::Retry(err) = self.process_campaign(graphql, id).await {
                    error!(campaign_id = %id, error = %err, "event expiration failed for campaign; will retry next cron tick");
                }
            }

            // The job as a whole succeeds even when individual campaigns failed;
            // the cron fires again on its own schedule and will retry them.
            HandlerOutcome::Success
        } else {
            self.process_campaign(graphql, campaign_id).await
        }
    }

    async fn process_campaign(&self, graphql: &GraphQlClient, campaign_id: &str) -> HandlerOutcome {
        let events = match graphql.get_overdue_events(campaign_id, self.grace_period).await {
            Ok(events) => events,
            Err(e) => return HandlerOutcome::Retry(e.to_string()),
        };

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for batch in events.chunks(BATCH_SIZE) {
            let results = join_all(batch.iter().map(|event| graphql.expire_event(&event.id))).await;
            for result in results {
                match result {
                    Ok(true) => succeeded += 1,
                    Ok(false) | Err(_) => failed += 1,
                }
            }
        }

        if failed > 0 {
            warn!(campaign_id, succeeded, failed, "some overdue events failed to expire this tick");
        }

        HandlerOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::graphql::{GraphQlClient, GraphQlError, GraphQlTransport};

    struct StubTransport {
        responses: Vec<Result<Value, GraphQlError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GraphQlTransport for StubTransport {
        async fn send(&self, _operation: &str, _query: &str, _variables: Value) -> Result<Value, GraphQlError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(index)
                .cloned()
                .unwrap_or_else(|| Err(GraphQlError::Transport("no more stubbed responses".to_string())))
        }
    }

    fn client_with(responses: Vec<Result<Value, GraphQlError>>) -> GraphQlClient {
        let transport = Arc::new(StubTransport {
            responses,
            calls: AtomicUsize::new(0),
        });
        GraphQlClient::with_transport(transport, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn single_campaign_with_no_overdue_events_succeeds() {
        let client = client_with(vec![Ok(serde_json::json!({ "data": { "overdueEvents": [] } }))]);
        let handler = EventExpirationHandler::default();
        let outcome = handler.handle(&client, "campaign-1").await;
        assert!(matches!(outcome, HandlerOutcome::Success));
    }

    #[tokio::test]
    async fn fetch_failure_is_retried() {
        let client = client_with(vec![Err(GraphQlError::Transport("timeout".to_string()))]);
        let handler = EventExpirationHandler::default();
        let outcome = handler.handle(&client, "campaign-1").await;
        assert!(matches!(outcome, HandlerOutcome::Retry(_)));
    }

    #[tokio::test]
    async fn system_mode_continues_past_a_failed_campaign() {
        let client = client_with(vec![
            Ok(serde_json::json!({ "data": { "campaigns": [{ "id": "campaign-1" }, { "id": "campaign-2" }] } })),
            Err(GraphQlError::Transport("campaign-1 down".to_string())),
            Ok(serde_json::json!({ "data": { "overdueEvents": [] } })),
        ]);
        let handler = EventExpirationHandler::default();
        let outcome = handler.handle(&client, SYSTEM_CAMPAIGN).await;
        assert!(matches!(outcome, HandlerOutcome::Success));
    }

    #[test]
    #[should_panic(expected = "non-negative")]
    fn negative_grace_period_panics() {
        EventExpirationHandler::with_grace_period(chrono::Duration::seconds(-1));
    }
}
