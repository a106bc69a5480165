//! §4.6.3: settlement growth — scheduling the next population/resource/
//! level-up occurrence per settlement, and applying one when it fires.

use std::collections::HashMap;

use tracing::{error, warn};

use crate::domain::{variable_f64, variable_i64, HandlerContext};
use crate::graphql::types::Settlement;
use crate::jobs::{GrowthEventType, HandlerOutcome, SYSTEM_CAMPAIGN};

fn level_multiplier(level: u32) -> f64 {
    match level {
        1 => 1.0,
        2 => 0.9,
        3 => 0.8,
        4 => 0.7,
        5 => 0.6,
        _ => 1.0,
    }
}

fn population_growth_plan(settlement: &Settlement) -> (i64, HashMap<String, serde_json::Value>) {
    let m = level_multiplier(settlement.level);
    let interval_minutes =
        variable_i64(&settlement.variables, "customPopulationIntervalMinutes").unwrap_or_else(|| (60.0 * m) as i64);
    let mut parameters = HashMap::new();
    parameters.insert("growthRate".to_string(), serde_json::json!(variable_f64(&settlement.variables, "growthRate", 0.05)));
    parameters.insert(
        "currentPopulation".to_string(),
        serde_json::json!(variable_f64(&settlement.variables, "currentPopulation", 100.0)),
    );
    parameters.insert(
        "populationCap".to_string(),
        serde_json::json!(variable_f64(&settlement.variables, "populationCap", 1000.0)),
    );
    (interval_minutes, parameters)
}

fn resource_generation_plan(settlement: &Settlement) -> (i64, HashMap<String, serde_json::Value>) {
    let m = level_multiplier(settlement.level);
    let interval_minutes =
        variable_i64(&settlement.variables, "customResourceIntervalMinutes").unwrap_or_else(|| (60.0 * m) as i64);
    let defaults = [("food", 10.0), ("gold", 5.0), ("materials", 3.0)];
    let mut rates = serde_json::Map::new();
    for (resource, default_rate) in defaults {
        let rate = variable_f64(&settlement.variables, &format!("{}Rate", resource), default_rate);
        rates.insert(resource.to_string(), serde_json::json!(rate));
    }
    let mut parameters = HashMap::new();
    parameters.insert("resourceTypes".to_string(), serde_json::json!(["food", "gold", "materials"]));
    parameters.insert("rates".to_string(), serde_json::Value::Object(rates));
    (interval_minutes, parameters)
}

fn level_up_check_plan(settlement: &Settlement) -> (i64, HashMap<String, serde_json::Value>) {
    let m = level_multiplier(settlement.level);
    let interval_minutes = (360.0 * m) as i64;
    let mut parameters = HashMap::new();
    parameters.insert(
        "threshold".to_string(),
        serde_json::json!((settlement.level as f64 + 1.0) * 500.0),
    );
    (interval_minutes, parameters)
}

fn plan_for(settlement: &Settlement, event_type: GrowthEventType) -> (i64, HashMap<String, serde_json::Value>) {
    match event_type {
        GrowthEventType::PopulationGrowth => population_growth_plan(settlement),
        GrowthEventType::ResourceGeneration => resource_generation_plan(settlement),
        GrowthEventType::LevelUpCheck => level_up_check_plan(settlement),
    }
}

async fn enqueue_growth_event(
    ctx: &HandlerContext,
    settlement: &Settlement,
    event_type: GrowthEventType,
) -> crate::Result<()> {
    let (interval_minutes, parameters) = plan_for(settlement, event_type);
    let delay_ms = (interval_minutes.max(0) as u64) * 60_000;
    let payload = serde_json::json!({
        "settlementId": settlement.id,
        "eventType": event_type,
        "parameters": parameters,
    });
    ctx.queue
        .enqueue(
            "SettlementGrowth",
            payload,
            &settlement.campaign_id,
            ctx.queue_defaults.clone().with_delay_ms(delay_ms),
        )
        .await
        .map_err(crate::Error::from)?;
    Ok(())
}

async fn schedule_settlement(ctx: &HandlerContext, settlement: &Settlement) -> crate::Result<()> {
    for event_type in [
        GrowthEventType::PopulationGrowth,
        GrowthEventType::ResourceGeneration,
        GrowthEventType::LevelUpCheck,
    ] {
        enqueue_growth_event(ctx, settlement, event_type).await?;
    }
    Ok(())
}

/// Handles a `RecalculateSettlementSchedules` job: fan out over every
/// settlement in scope and (re)schedule its growth events.
pub async fn handle_recalculate(ctx: &HandlerContext, campaign_id: &str) -> HandlerOutcome {
    let campaign_ids = if campaign_id == SYSTEM_CAMPAIGN {
        match ctx.graphql.get_all_campaign_ids().await {
            Ok(ids) => ids,
            Err(e) => return HandlerOutcome::Retry(e.to_string()),
        }
    } else {
        vec![campaign_id.to_string()]
    };

    for id in &campaign_ids {
        let settlements = match ctx.graphql.get_settlements_by_campaign(id).await {
            Ok(s) => s,
            Err(e) => {
                error!(campaign_id = %id, error = %e, "failed to fetch settlements");
                continue;
            }
        };
        for settlement in &settlements {
            if let Err(e) = schedule_settlement(ctx, settlement).await {
                error!(settlement_id = %settlement.id, error = %e, "failed to schedule settlement growth");
            }
        }
    }

    HandlerOutcome::Success
}

/// Handles a `SettlementGrowth` job: applies the effect captured at
/// scheduling time, then re-enqueues the next occurrence with a freshly
/// computed interval.
pub async fn handle_growth(
    ctx: &HandlerContext,
    campaign_id: &str,
    settlement_id: &str,
    event_type: GrowthEventType,
    parameters: &HashMap<String, serde_json::Value>,
) -> HandlerOutcome {
    let settlements = match ctx.graphql.get_settlements_by_campaign(campaign_id).await {
        Ok(s) => s,
        Err(e) => return HandlerOutcome::Retry(e.to_string()),
    };
    let Some(settlement) = settlements.into_iter().find(|s| s.id == settlement_id) else {
        return HandlerOutcome::Terminal(format!("settlement {} no longer exists", settlement_id));
    };

    let patch = match event_type {
        GrowthEventType::PopulationGrowth => {
            let growth_rate = variable_f64(parameters, "growthRate", 0.05);
            let current = variable_f64(parameters, "currentPopulation", 100.0);
            let cap = variable_f64(parameters, "populationCap", 1000.0);
            let next = (current * (1.0 + growth_rate)).min(cap);
            serde_json::json!({ "currentPopulation": next })
        }
        GrowthEventType::ResourceGeneration => {
            serde_json::json!({ "resources": parameters.get("rates").cloned().unwrap_or_default() })
        }
        GrowthEventType::LevelUpCheck => {
            let threshold = variable_f64(parameters, "threshold", (settlement.level as f64 + 1.0) * 500.0);
            serde_json::json!({ "levelUpThreshold": threshold })
        }
    };

    if let Err(e) = ctx.graphql.update_settlement(settlement_id, patch).await {
        return HandlerOutcome::Retry(e.to_string());
    }

    if let Err(e) = enqueue_growth_event(ctx, &settlement, event_type).await {
        warn!(settlement_id, error = %e, "applied growth update but failed to re-enqueue the next occurrence");
    }

    HandlerOutcome::Success
}
