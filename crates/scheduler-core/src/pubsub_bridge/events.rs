//! Payload shapes for the two subscribed channel families (§4.4) and the
//! internal command handed from the receive loop to the debounce/enqueue
//! worker.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EntityType {
    Settlement,
    Structure,
    Event,
    Encounter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EntityOperation {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorldTimeAdvanced {
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    #[serde(rename = "previousTime")]
    pub previous_time: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "newTime")]
    pub new_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityModified {
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    #[serde(rename = "entityType")]
    pub entity_type: EntityType,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    pub operation: EntityOperation,
}

/// Decoded off a Redis message, handed from the receive loop to the worker
/// task over a bounded channel. Carries the channel name so the worker can
/// tell which family a message belongs to without re-matching the pattern.
#[derive(Debug, Clone)]
pub enum BridgeCommand {
    WorldTimeAdvanced(WorldTimeAdvanced),
    EntityModified(EntityModified),
}

pub fn decode(channel: &str, payload: &str) -> Option<BridgeCommand> {
    if channel.ends_with(".worldTimeAdvanced") {
        match serde_json::from_str::<WorldTimeAdvanced>(payload) {
            Ok(event) => Some(BridgeCommand::WorldTimeAdvanced(event)),
            Err(e) => {
                tracing::warn!(channel, error = %e, "malformed worldTimeAdvanced payload, dropping");
                None
            }
        }
    } else if channel.ends_with(".entityModified") {
        match serde_json::from_str::<EntityModified>(payload) {
            Ok(event) => Some(BridgeCommand::EntityModified(event)),
            Err(e) => {
                tracing::warn!(channel, error = %e, "malformed entityModified payload, dropping");
                None
            }
        }
    } else {
        tracing::warn!(channel, "message on unrecognized channel, dropping");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_well_formed_world_time_advanced_event() {
        let payload = r#"{"campaignId":"c1","previousTime":"2026-01-01T00:00:00Z","newTime":"2026-01-01T01:00:00Z"}"#;
        let command = decode("campaign.c1.worldTimeAdvanced", payload);
        assert!(matches!(command, Some(BridgeCommand::WorldTimeAdvanced(_))));
    }

    #[test]
    fn decodes_a_well_formed_entity_modified_event() {
        let payload = r#"{"campaignId":"c1","entityType":"Settlement","entityId":"s1","operation":"UPDATE"}"#;
        let command = decode("campaign.c1.entityModified", payload);
        assert!(matches!(command, Some(BridgeCommand::EntityModified(_))));
    }

    #[test]
    fn malformed_json_is_dropped_not_panicked() {
        assert!(decode("campaign.c1.worldTimeAdvanced", "not json").is_none());
        assert!(decode("campaign.c1.entityModified", "{}").is_none());
    }

    #[test]
    fn unrecognized_channel_is_dropped() {
        assert!(decode("campaign.c1.somethingElse", "{}").is_none());
    }
}
