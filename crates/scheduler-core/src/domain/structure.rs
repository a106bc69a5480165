//! §4.6.3: structure maintenance — scheduling construction completion,
//! upkeep, and upgrade-availability checks, and applying one when it fires.

use std::collections::HashMap;

use tracing::{error, warn};

use crate::domain::{variable_f64, variable_i64, HandlerContext};
use crate::graphql::types::Structure;
use crate::jobs::{HandlerOutcome, MaintenanceType, SYSTEM_CAMPAIGN};

const DEFAULT_MAINTENANCE_INTERVAL_MINUTES: i64 = 120;
const UPGRADE_CHECK_INTERVAL_MINUTES: i64 = 360;

fn enqueue_payload(structure_id: &str, maintenance_type: MaintenanceType, parameters: HashMap<String, serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "structureId": structure_id,
        "maintenanceType": maintenance_type,
        "parameters": parameters,
    })
}

async fn enqueue_maintenance(
    ctx: &HandlerContext,
    structure: &Structure,
    maintenance_type: MaintenanceType,
    delay_minutes: i64,
    parameters: HashMap<String, serde_json::Value>,
) -> crate::Result<()> {
    let delay_ms = (delay_minutes.max(0) as u64) * 60_000;
    let payload = enqueue_payload(&structure.id, maintenance_type, parameters);
    ctx.queue
        .enqueue(
            "StructureMaintenance",
            payload,
            &structure.campaign_id,
            ctx.queue_defaults.clone().with_delay_ms(delay_ms),
        )
        .await
        .map_err(crate::Error::from)?;
    Ok(())
}

async fn schedule_structure(ctx: &HandlerContext, structure: &Structure) -> crate::Result<()> {
    if let Some(construction_minutes) = variable_i64(&structure.variables, "constructionDurationMinutes") {
        if construction_minutes > 0 {
            enqueue_maintenance(ctx, structure, MaintenanceType::ConstructionComplete, construction_minutes, HashMap::new())
                .await?;
        }
    }

    if structure.is_operational {
        let maintenance_interval =
            variable_i64(&structure.variables, "customMaintenanceIntervalMinutes").unwrap_or(DEFAULT_MAINTENANCE_INTERVAL_MINUTES);
        enqueue_maintenance(ctx, structure, MaintenanceType::MaintenanceDue, maintenance_interval, HashMap::new()).await?;

        if structure.level < structure.max_level {
            enqueue_maintenance(ctx, structure, MaintenanceType::UpgradeAvailable, UPGRADE_CHECK_INTERVAL_MINUTES, HashMap::new())
                .await?;
        }
    }

    Ok(())
}

/// Handles a `RecalculateStructureSchedules` job.
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
        let structures = match ctx.graphql.get_structures_by_campaign(id).await {
            Ok(s) => s,
            Err(e) => {
                error!(campaign_id = %id, error = %e, "failed to fetch structures");
                continue;
            }
        };
        for structure in &structures {
            if let Err(e) = schedule_structure(ctx, structure).await {
                error!(structure_id = %structure.id, error = %e, "failed to schedule structure maintenance");
            }
        }
    }

    HandlerOutcome::Success
}

/// Handles a `StructureMaintenance` job: applies the maintenance effect,
/// then re-enqueues the next occurrence if the condition that scheduled it
/// still holds.
pub async fn handle_maintenance(
    ctx: &HandlerContext,
    campaign_id: &str,
    structure_id: &str,
    maintenance_type: MaintenanceType,
    _parameters: &HashMap<String, serde_json::Value>,
) -> HandlerOutcome {
    let structures = match ctx.graphql.get_structures_by_campaign(campaign_id).await {
        Ok(s) => s,
        Err(e) => return HandlerOutcome::Retry(e.to_string()),
    };
    let Some(structure) = structures.into_iter().find(|s| s.id == structure_id) else {
        return HandlerOutcome::Terminal(format!("structure {} no longer exists", structure_id));
    };

    let patch = match maintenance_type {
        MaintenanceType::ConstructionComplete => serde_json::json!({ "constructionDurationMinutes": 0 }),
        MaintenanceType::MaintenanceDue => serde_json::json!({ "lastMaintenanceAt": chrono::Utc::now() }),
        MaintenanceType::UpgradeAvailable => serde_json::json!({ "upgradeAvailable": true }),
    };

    if let Err(e) = ctx.graphql.update_structure(structure_id, patch).await {
        return HandlerOutcome::Retry(e.to_string());
    }

    let reenqueue = match maintenance_type {
        // A one-time event: construction finishes exactly once.
        MaintenanceType::ConstructionComplete => None,
        MaintenanceType::MaintenanceDue if structure.is_operational => {
            let interval = variable_i64(&structure.variables, "customMaintenanceIntervalMinutes")
                .unwrap_or(DEFAULT_MAINTENANCE_INTERVAL_MINUTES);
            Some((MaintenanceType::MaintenanceDue, interval))
        }
        MaintenanceType::UpgradeAvailable if structure.is_operational && structure.level < structure.max_level => {
            Some((MaintenanceType::UpgradeAvailable, UPGRADE_CHECK_INTERVAL_MINUTES))
        }
        _ => None,
    };

    if let Some((next_type, delay_minutes)) = reenqueue {
        if let Err(e) = enqueue_maintenance(ctx, &structure, next_type, delay_minutes, HashMap::new()).await {
            warn!(structure_id, error = %e, "applied maintenance update but failed to re-enqueue the next occurrence");
        }
    }

    HandlerOutcome::Success
}
