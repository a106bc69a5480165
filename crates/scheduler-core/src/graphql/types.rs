//! Typed shapes for the GraphQL operations in §6. Kept intentionally small:
//! only the fields the handlers in `domain/` actually read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    pub id: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteEffectResult {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverdueEvent {
    pub id: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    #[serde(rename = "scheduledAt")]
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    pub level: u32,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Structure {
    pub id: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    pub level: u32,
    #[serde(rename = "maxLevel", default = "default_max_level")]
    pub max_level: u32,
    #[serde(rename = "isOperational", default = "default_true")]
    pub is_operational: bool,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

fn default_max_level() -> u32 {
    5
}

fn default_true() -> bool {
    true
}
