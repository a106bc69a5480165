//! The pooled, breaker-guarded, cached GraphQL client (§4.5). Grounded on
//! the teacher's payment gateways (`payment/gateways/stripe.rs`): a held
//! `reqwest::Client`, a bearer-style header built per request, typed
//! `response.json::<T>()` decoding gated on status code.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::alerting::{AlertManager, Severity};
use crate::graphql::cache::{CampaignIdCache, EffectCache};
use crate::graphql::circuit_breaker::{CircuitBreaker, State};
use crate::graphql::types::{Effect, ExecuteEffectResult, OverdueEvent, Settlement, Structure};
use crate::graphql::GraphQlError;

/// Seam that lets tests substitute a canned responder instead of a live
/// server or a mock framework (§9 "Test tooling").
#[async_trait]
pub trait GraphQlTransport: Send + Sync {
    async fn send(&self, operation: &str, query: &str, variables: Value) -> Result<Value, GraphQlError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl ReqwestTransport {
    pub fn new(url: String, token: String, request_timeout_ms: u64) -> Result<Self, GraphQlError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(|e| GraphQlError::Transport(e.to_string()))?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl GraphQlTransport for ReqwestTransport {
    async fn send(&self, operation: &str, query: &str, variables: Value) -> Result<Value, GraphQlError> {
        let body = serde_json::json!({
            "query": query,
            "variables": variables,
            "operationName": operation,
        });

        // The service-account token and response bodies must never be logged (§4.5).
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphQlError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GraphQlError::Transport(format!(
                "{} returned http {}",
                operation,
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GraphQlError::Transport(e.to_string()))
    }
}

pub struct GraphQlClient {
    transport: Arc<dyn GraphQlTransport>,
    breaker: CircuitBreaker,
    effect_cache: EffectCache,
    campaign_cache: CampaignIdCache,
    alerts: Option<Arc<AlertManager>>,
}

impl GraphQlClient {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        request_timeout_ms: u64,
        breaker_reset: Duration,
    ) -> crate::Result<Self> {
        let transport = ReqwestTransport::new(url.into(), token.into(), request_timeout_ms)
            .map_err(crate::Error::from)?;
        Ok(Self::with_transport(Arc::new(transport), breaker_reset))
    }

    pub fn with_transport(transport: Arc<dyn GraphQlTransport>, breaker_reset: Duration) -> Self {
        Self {
            transport,
            breaker: CircuitBreaker::new(breaker_reset),
            effect_cache: EffectCache::new(),
            campaign_cache: CampaignIdCache::new(),
            alerts: None,
        }
    }

    /// Wires a critical alert for the circuit breaker's Closed-to-Open
    /// transition (§4.9). Optional: tests and the other handler constructors
    /// that only need a client to call through the breaker can skip it.
    pub fn with_alerts(mut self, alerts: Arc<AlertManager>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn invalidate_effect(&self, effect_id: &str) {
        self.effect_cache.invalidate(effect_id);
    }

    pub fn invalidate_campaign_ids(&self) {
        self.campaign_cache.invalidate();
    }

    async fn execute(&self, operation: &str, query: &str, variables: Value) -> Result<Value, GraphQlError> {
        if self.breaker.try_acquire().await.is_none() {
            return Err(GraphQlError::CircuitOpen);
        }

        let sent = self.transport.send(operation, query, variables).await;
        match &sent {
            Ok(_) => self.breaker.record_success().await,
            Err(_) => {
                let was_open = self.breaker.state().await == State::Open;
                self.breaker.record_failure().await;
                if self.breaker.state().await == State::Open {
                    warn!("invalidating graphql caches after breaker opened");
                    self.effect_cache.invalidate_all();
                    self.campaign_cache.invalidate();
                    if !was_open {
                        if let Some(alerts) = &self.alerts {
                            alerts
                                .send(
                                    Severity::Critical,
                                    "graphql circuit breaker opened",
                                    format!("breaker tripped while calling '{}'", operation),
                                )
                                .await;
                        }
                    }
                }
            }
        }
        let value = sent?;

        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let messages = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()).map(str::to_string))
                    .collect();
                return Err(GraphQlError::GraphQl(messages));
            }
        }

        Ok(value.get("data").cloned().unwrap_or(Value::Null))
    }

    pub async fn get_effect(&self, effect_id: &str) -> Result<Option<Effect>, GraphQlError> {
        if let Some(cached) = self.effect_cache.get(effect_id) {
            return Ok(Some(cached));
        }

        let query = "query GetEffect($id: ID!) { effect(id: $id) { id campaignId isActive } }";
        let data = self
            .execute("GetEffect", query, serde_json::json!({ "id": effect_id }))
            .await?;

        match data.get("effect").filter(|v| !v.is_null()) {
            None => Ok(None),
            Some(raw) => {
                let effect: Effect = serde_json::from_value(raw.clone())
                    .map_err(|e| GraphQlError::Transport(format!("malformed effect: {}", e)))?;
                self.effect_cache.insert(effect.clone());
                Ok(Some(effect))
            }
        }
    }

    pub async fn execute_effect(&self, effect_id: &str) -> Result<ExecuteEffectResult, GraphQlError> {
        let query = "mutation ExecuteEffect($id: ID!) { executeEffect(id: $id) { success error } }";
        let data = self
            .execute("ExecuteEffect", query, serde_json::json!({ "id": effect_id }))
            .await?;
        let raw = data
            .get("executeEffect")
            .filter(|v| !v.is_null())
            .ok_or_else(|| GraphQlError::EmptyResult("ExecuteEffect".to_string()))?;
        serde_json::from_value(raw.clone())
            .map_err(|e| GraphQlError::Transport(format!("malformed executeEffect result: {}", e)))
    }

    pub async fn get_overdue_events(
        &self,
        campaign_id: &str,
        grace_period: chrono::Duration,
    ) -> Result<Vec<OverdueEvent>, GraphQlError> {
        let query = "query GetOverdueEvents($campaignId: ID!, $gracePeriodSeconds: Int!) { overdueEvents(campaignId: $campaignId, gracePeriodSeconds: $gracePeriodSeconds) { id campaignId scheduledAt } }";
        let data = self
            .execute(
                "GetOverdueEvents",
                query,
                serde_json::json!({
                    "campaignId": campaign_id,
                    "gracePeriodSeconds": grace_period.num_seconds(),
                }),
            )
            .await?;

        match data.get("overdueEvents") {
            Some(raw) if !raw.is_null() => serde_json::from_value(raw.clone())
                .map_err(|e| GraphQlError::Transport(format!("malformed overdueEvents: {}", e))),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn get_all_campaign_ids(&self) -> Result<Vec<String>, GraphQlError> {
        if let Some(cached) = self.campaign_cache.get() {
            return Ok(cached);
        }

        let query = "query GetAllCampaignIds { campaigns { id } }";
        let data = self.execute("GetAllCampaignIds", query, serde_json::json!({})).await?;
        let ids: Vec<String> = data
            .get("campaigns")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| c.get("id").and_then(|id| id.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        self.campaign_cache.insert(ids.clone());
        Ok(ids)
    }

    pub async fn get_settlements_by_campaign(&self, campaign_id: &str) -> Result<Vec<Settlement>, GraphQlError> {
        let query = "query GetSettlementsByCampaign($campaignId: ID!) { settlements(campaignId: $campaignId) { id campaignId level variables } }";
        let data = self
            .execute(
                "GetSettlementsByCampaign",
                query,
                serde_json::json!({ "campaignId": campaign_id }),
            )
            .await?;

        match data.get("settlements") {
            Some(raw) if !raw.is_null() => serde_json::from_value(raw.clone())
                .map_err(|e| GraphQlError::Transport(format!("malformed settlements: {}", e))),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn get_structures_by_campaign(&self, campaign_id: &str) -> Result<Vec<Structure>, GraphQlError> {
        let query = "query GetStructuresByCampaign($campaignId: ID!) { structures(campaignId: $campaignId) { id campaignId level maxLevel isOperational variables } }";
        let data = self
            .execute(
                "GetStructuresByCampaign",
                query,
                serde_json::json!({ "campaignId": campaign_id }),
            )
            .await?;

        match data.get("structures") {
            Some(raw) if !raw.is_null() => serde_json::from_value(raw.clone())
                .map_err(|e| GraphQlError::Transport(format!("malformed structures: {}", e))),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn expire_event(&self, event_id: &str) -> Result<bool, GraphQlError> {
        let query = "mutation ExpireEvent($id: ID!) { expireEvent(id: $id) { success } }";
        let data = self
            .execute("ExpireEvent", query, serde_json::json!({ "id": event_id }))
            .await?;
        bool_field(&data, "expireEvent", "ExpireEvent")
    }

    pub async fn complete_event(&self, event_id: &str) -> Result<bool, GraphQlError> {
        let query = "mutation CompleteEvent($id: ID!) { completeEvent(id: $id) { success } }";
        let data = self
            .execute("CompleteEvent", query, serde_json::json!({ "id": event_id }))
            .await?;
        bool_field(&data, "completeEvent", "CompleteEvent")
    }

    pub async fn update_settlement(&self, settlement_id: &str, patch: Value) -> Result<bool, GraphQlError> {
        let query = "mutation UpdateSettlement($id: ID!, $patch: JSON!) { updateSettlement(id: $id, patch: $patch) { success } }";
        let data = self
            .execute(
                "UpdateSettlement",
                query,
                serde_json::json!({ "id": settlement_id, "patch": patch }),
            )
            .await?;
        bool_field(&data, "updateSettlement", "UpdateSettlement")
    }

    pub async fn update_structure(&self, structure_id: &str, patch: Value) -> Result<bool, GraphQlError> {
        let query = "mutation UpdateStructure($id: ID!, $patch: JSON!) { updateStructure(id: $id, patch: $patch) { success } }";
        let data = self
            .execute(
                "UpdateStructure",
                query,
                serde_json::json!({ "id": structure_id, "patch": patch }),
            )
            .await?;
        bool_field(&data, "updateStructure", "UpdateStructure")
    }
}

fn bool_field(data: &Value, field: &str, operation: &str) -> Result<bool, GraphQlError> {
    let raw = data
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| GraphQlError::EmptyResult(operation.to_string()))?;
    raw.get("success")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| GraphQlError::EmptyResult(operation.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

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
    async fn get_effect_caches_a_hit() {
        let client = client_with(vec![Ok(serde_json::json!({
            "data": { "effect": { "id": "effect-1", "campaignId": "campaign-1", "isActive": true } }
        }))]);

        let first = client.get_effect("effect-1").await.unwrap().unwrap();
        assert_eq!(first.campaign_id, "campaign-1");

        // Second call must come from cache; the stub only has one response queued.
        let second = client.get_effect("effect-1").await.unwrap().unwrap();
        assert_eq!(second.id, "effect-1");
    }

    #[tokio::test]
    async fn graphql_errors_array_surfaces_as_graphql_error() {
        let client = client_with(vec![Ok(serde_json::json!({
            "errors": [{ "message": "effect not found" }]
        }))]);

        let err = client.get_effect("missing").await.unwrap_err();
        assert!(matches!(err, GraphQlError::GraphQl(messages) if messages == vec!["effect not found".to_string()]));
    }

    #[tokio::test]
    async fn execute_effect_with_null_field_is_empty_result() {
        let client = client_with(vec![Ok(serde_json::json!({ "data": { "executeEffect": null } }))]);
        let err = client.execute_effect("effect-1").await.unwrap_err();
        assert!(matches!(err, GraphQlError::EmptyResult(op) if op == "ExecuteEffect"));
    }
}
