//! The job data model (§3): kind-tagged payloads, priority, backoff, and the
//! envelope record persisted in Redis.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::jobs::JobError;

pub type JobId = Uuid;

/// Tenancy key reserved for fleet-wide periodic checks.
pub const SYSTEM_CAMPAIGN: &str = "SYSTEM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPriority {
    Low = 1,
    Normal = 5,
    High = 8,
    Critical = 10,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Critical => write!(f, "critical"),
        }
    }
}

impl JobPriority {
    /// Rank used to order priority bands in the ready set, 0 = reserved first.
    pub fn rank(&self) -> u64 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub initial_delay_ms: u64,
}

impl Backoff {
    pub fn exponential(initial_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            initial_delay_ms,
        }
    }

    pub fn fixed(initial_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            initial_delay_ms,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::exponential(5_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GrowthEventType {
    PopulationGrowth,
    ResourceGeneration,
    LevelUpCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MaintenanceType {
    ConstructionComplete,
    MaintenanceDue,
    UpgradeAvailable,
}

/// One case per `kind`; the dispatcher matches over this directly rather than
/// routing by a string discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum JobPayload {
    DeferredEffect {
        #[serde(rename = "effectId")]
        effect_id: String,
        #[serde(rename = "executeAt")]
        execute_at: DateTime<Utc>,
    },
    SettlementGrowth {
        #[serde(rename = "settlementId")]
        settlement_id: String,
        #[serde(rename = "eventType")]
        event_type: GrowthEventType,
        parameters: HashMap<String, serde_json::Value>,
    },
    StructureMaintenance {
        #[serde(rename = "structureId")]
        structure_id: String,
        #[serde(rename = "maintenanceType")]
        maintenance_type: MaintenanceType,
        parameters: HashMap<String, serde_json::Value>,
    },
    EventExpiration {},
    RecalculateSettlementSchedules {},
    RecalculateStructureSchedules {},
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::DeferredEffect { .. } => "DeferredEffect",
            JobPayload::SettlementGrowth { .. } => "SettlementGrowth",
            JobPayload::StructureMaintenance { .. } => "StructureMaintenance",
            JobPayload::EventExpiration {} => "EventExpiration",
            JobPayload::RecalculateSettlementSchedules {} => "RecalculateSettlementSchedules",
            JobPayload::RecalculateStructureSchedules {} => "RecalculateStructureSchedules",
        }
    }

    /// Decodes a raw `{kind, payload}` record, distinguishing an unrecognized
    /// kind tag from a recognized kind with a malformed payload body — the two
    /// error categories the dispatcher (§4.2) must tell apart.
    pub fn decode(kind: &str, payload: &serde_json::Value) -> Result<Self, JobError> {
        let envelope = serde_json::json!({ "kind": kind, "payload": payload });
        match kind {
            "DeferredEffect"
            | "SettlementGrowth"
            | "StructureMaintenance"
            | "EventExpiration"
            | "RecalculateSettlementSchedules"
            | "RecalculateStructureSchedules" => serde_json::from_value(envelope)
                .map_err(|e| JobError::BadPayload(format!("{}: {}", kind, e))),
            other => Err(JobError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// The persisted envelope: everything in §3's `Job` plus the bookkeeping the
/// queue needs (lease epoch, status). `payload` is kept as raw JSON alongside
/// a `kind` tag so a record written by a newer/older version of the service
/// can still be loaded and — if undecodable — routed to a bad-payload
/// terminal failure rather than a deserialization panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: String,
    pub campaign_id: String,
    pub priority: JobPriority,
    pub payload: serde_json::Value,
    pub ready_at: DateTime<Utc>,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub lease_epoch: u64,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl JobRecord {
    pub fn decode_payload(&self) -> Result<JobPayload, JobError> {
        JobPayload::decode(&self.kind, &self.payload)
    }

    pub fn is_system(&self) -> bool {
        self.campaign_id == SYSTEM_CAMPAIGN
    }

    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}

/// Options accepted by `Queue::enqueue`.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: JobPriority,
    pub delay_ms: u64,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: JobPriority::Normal,
            delay_ms: 0,
            max_attempts: 3,
            backoff: Backoff::default(),
            remove_on_complete: false,
            remove_on_fail: false,
        }
    }
}

impl EnqueueOptions {
    /// Builds the defaults every producer should enqueue with, honoring the
    /// operator-configured `QUEUE_MAX_RETRIES`/`QUEUE_RETRY_BACKOFF_MS` (§6)
    /// instead of the hardcoded `max_attempts=3`/5s-exponential fallback.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            backoff: Backoff::exponential(config.retry_backoff_ms),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_honors_configured_retries_and_backoff() {
        let config = QueueConfig {
            max_retries: 7,
            retry_backoff_ms: 1500,
            concurrency: 4,
        };
        let opts = EnqueueOptions::from_config(&config);
        assert_eq!(opts.max_attempts, 7);
        assert_eq!(opts.backoff.initial_delay_ms, 1500);
        assert_eq!(opts.backoff.kind, BackoffKind::Exponential);
    }

    #[test]
    fn priority_ranks_critical_first() {
        assert!(JobPriority::Critical.rank() < JobPriority::High.rank());
        assert!(JobPriority::High.rank() < JobPriority::Normal.rank());
        assert!(JobPriority::Normal.rank() < JobPriority::Low.rank());
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let err = JobPayload::decode("NotAKind", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, JobError::UnknownKind(_)));
    }

    #[test]
    fn decode_rejects_malformed_payload_for_known_kind() {
        let err = JobPayload::decode(
            "DeferredEffect",
            &serde_json::json!({ "growthType": "PopulationGrowth" }),
        )
        .unwrap_err();
        assert!(matches!(err, JobError::BadPayload(_)));
    }

    #[test]
    fn decode_round_trips_a_settlement_growth_payload() {
        let payload = serde_json::json!({
            "settlementId": "settlement-1",
            "eventType": "PopulationGrowth",
            "parameters": { "growthRate": 0.05 }
        });
        let decoded = JobPayload::decode("SettlementGrowth", &payload).unwrap();
        match decoded {
            JobPayload::SettlementGrowth { settlement_id, event_type, .. } => {
                assert_eq!(settlement_id, "settlement-1");
                assert_eq!(event_type, GrowthEventType::PopulationGrowth);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
