//! §4.6.1: fire a single deferred effect once its scheduled time arrives.
//!
//! The only handler that never touches the queue, so it takes the GraphQL
//! client directly rather than a full [`crate::domain::HandlerContext`].

use crate::graphql::GraphQlClient;
use crate::jobs::HandlerOutcome;

pub async fn handle(graphql: &GraphQlClient, effect_id: &str, campaign_id: &str) -> HandlerOutcome {
    let effect = match graphql.get_effect(effect_id).await {
        Ok(Some(effect)) => effect,
        Ok(None) => return HandlerOutcome::Terminal(format!("effect {} not found", effect_id)),
        Err(e) => return HandlerOutcome::Retry(e.to_string()),
    };

    if effect.campaign_id != campaign_id {
        return HandlerOutcome::Terminal(format!(
            "effect {} belongs to campaign {}, not {}",
            effect_id, effect.campaign_id, campaign_id
        ));
    }

    if !effect.is_active {
        return HandlerOutcome::Success; // skipped: effect is not active
    }

    match graphql.execute_effect(effect_id).await {
        Ok(result) if result.success => HandlerOutcome::Success,
        Ok(result) => HandlerOutcome::Retry(
            result.error.unwrap_or_else(|| "effect execution reported failure".to_string()),
        ),
        Err(e) => HandlerOutcome::Retry(e.to_string()),
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
    async fn missing_effect_is_terminal() {
        let client = client_with(vec![Ok(serde_json::json!({ "data": { "effect": null } }))]);
        let outcome = handle(&client, "effect-1", "campaign-1").await;
        assert!(matches!(outcome, HandlerOutcome::Terminal(_)));
    }

    #[tokio::test]
    async fn cross_tenancy_mismatch_is_terminal() {
        let client = client_with(vec![Ok(serde_json::json!({
            "data": { "effect": { "id": "effect-1", "campaignId": "campaign-other", "isActive": true } }
        }))]);
        let outcome = handle(&client, "effect-1", "campaign-1").await;
        assert!(matches!(outcome, HandlerOutcome::Terminal(_)));
    }

    #[tokio::test]
    async fn inactive_effect_is_skipped_successfully() {
        let client = client_with(vec![Ok(serde_json::json!({
            "data": { "effect": { "id": "effect-1", "campaignId": "campaign-1", "isActive": false } }
        }))]);
        let outcome = handle(&client, "effect-1", "campaign-1").await;
        assert!(matches!(outcome, HandlerOutcome::Success));
    }

    #[tokio::test]
    async fn execution_failure_is_retried() {
        let client = client_with(vec![
            Ok(serde_json::json!({
                "data": { "effect": { "id": "effect-1", "campaignId": "campaign-1", "isActive": true } }
            })),
            Ok(serde_json::json!({
                "data": { "executeEffect": { "success": false, "error": "target destroyed" } }
            })),
        ]);
        let outcome = handle(&client, "effect-1", "campaign-1").await;
        assert!(matches!(outcome, HandlerOutcome::Retry(msg) if msg == "target destroyed"));
    }
}
