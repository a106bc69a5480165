//! Health aggregation (C8, §4.8). `MetricsSource` is a narrow trait — queue
//! counts, dead-letter count, and three component pings — rather than the
//! whole `JobQueue`/`GraphQlClient`/pub/sub bridge, which is what resolves
//! the queue/health cyclic-reference Open Question: `check_health` depends
//! only on this trait, and `scheduler-service` is the one place that wires a
//! concrete implementation over the real components.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::jobs::QueueCounts;

#[derive(Debug, Clone, thiserror::Error)]
pub enum HealthError {
    #[error("process metrics unavailable: {0}")]
    ProcessUnavailable(String),
}

const DEGRADED_FAILURE_RATIO: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric form used by the Prometheus gauges (§4.8): 0 healthy/up, 1 degraded, 2 unhealthy/down.
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Degraded,
    Down,
}

impl ComponentState {
    pub fn as_gauge(&self) -> u8 {
        match self {
            ComponentState::Up => 0,
            ComponentState::Degraded => 1,
            ComponentState::Down => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub message: String,
    #[serde(rename = "lastChecked")]
    pub last_checked: DateTime<Utc>,
}

impl ComponentHealth {
    fn up(message: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Up,
            message: message.into(),
            last_checked: Utc::now(),
        }
    }

    fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Degraded,
            message: message.into(),
            last_checked: Utc::now(),
        }
    }

    fn down(message: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Down,
            message: message.into(),
            last_checked: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Components {
    pub redis: ComponentHealth,
    #[serde(rename = "redisSubscriber")]
    pub redis_subscriber: ComponentHealth,
    #[serde(rename = "bullQueue")]
    pub bull_queue: ComponentHealth,
    pub api: ComponentHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: u64,
    pub components: Components,
}

/// Everything `check_health` needs, kept deliberately narrow so this module
/// never depends on the concrete queue/GraphQL/pub-sub types.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn queue_counts(&self) -> crate::Result<QueueCounts>;
    async fn dead_letter_count(&self) -> crate::Result<u64>;
    async fn ping_redis(&self) -> crate::Result<()>;
    async fn ping_redis_subscriber(&self) -> crate::Result<()>;
    async fn ping_api(&self) -> crate::Result<()>;
}

fn rollup(components: &Components) -> HealthStatus {
    let states = [
        components.redis.status,
        components.redis_subscriber.status,
        components.bull_queue.status,
        components.api.status,
    ];
    if states.iter().any(|s| *s == ComponentState::Down) {
        HealthStatus::Unhealthy
    } else if states.iter().any(|s| *s == ComponentState::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

async fn probe_ping(result: crate::Result<()>, up_message: &str) -> ComponentHealth {
    match result {
        Ok(()) => ComponentHealth::up(up_message),
        Err(e) => ComponentHealth::down(e.to_string()),
    }
}

async fn probe_bull_queue(counts: crate::Result<QueueCounts>, dead_letter: crate::Result<u64>) -> ComponentHealth {
    let counts = match counts {
        Ok(c) => c,
        Err(e) => return ComponentHealth::down(e.to_string()),
    };
    if let Err(e) = dead_letter {
        return ComponentHealth::down(e.to_string());
    }
    let total = counts.active + counts.waiting + counts.delayed + counts.failed;
    if total == 0 {
        return ComponentHealth::up("queue empty");
    }
    let failure_ratio = counts.failed as f64 / total as f64;
    if failure_ratio > DEGRADED_FAILURE_RATIO {
        ComponentHealth::degraded(format!("failure ratio {:.1}% exceeds 10%", failure_ratio * 100.0))
    } else {
        ComponentHealth::up("within failure threshold")
    }
}

/// Runs every probe concurrently; any probe whose future errors is reported
/// as `down` with the error's message rather than failing the whole report.
pub async fn check_health(source: &dyn MetricsSource, version: &str, uptime_seconds: u64) -> HealthReport {
    let (redis, redis_subscriber, queue_counts, dead_letter, api) = tokio::join!(
        source.ping_redis(),
        source.ping_redis_subscriber(),
        source.queue_counts(),
        source.dead_letter_count(),
        source.ping_api(),
    );

    let components = Components {
        redis: probe_ping(redis, "connected").await,
        redis_subscriber: probe_ping(redis_subscriber, "subscribed").await,
        bull_queue: probe_bull_queue(queue_counts, dead_letter).await,
        api: probe_ping(api, "reachable").await,
    };

    let status = rollup(&components);

    HealthReport {
        status,
        timestamp: Utc::now(),
        version: version.to_string(),
        uptime_seconds,
        components,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource {
        redis_ok: bool,
        redis_subscriber_ok: bool,
        queue_counts: QueueCounts,
        queue_counts_ok: bool,
        dead_letter_count: u64,
        dead_letter_ok: bool,
        api_ok: bool,
    }

    #[async_trait]
    impl MetricsSource for FixedSource {
        async fn queue_counts(&self) -> crate::Result<QueueCounts> {
            if self.queue_counts_ok {
                Ok(self.queue_counts)
            } else {
                Err(crate::Error::other("queue unavailable"))
            }
        }
        async fn dead_letter_count(&self) -> crate::Result<u64> {
            if self.dead_letter_ok {
                Ok(self.dead_letter_count)
            } else {
                Err(crate::Error::other("dlq unavailable"))
            }
        }
        async fn ping_redis(&self) -> crate::Result<()> {
            if self.redis_ok {
                Ok(())
            } else {
                Err(crate::Error::other("redis down"))
            }
        }
        async fn ping_redis_subscriber(&self) -> crate::Result<()> {
            if self.redis_subscriber_ok {
                Ok(())
            } else {
                Err(crate::Error::other("subscriber down"))
            }
        }
        async fn ping_api(&self) -> crate::Result<()> {
            if self.api_ok {
                Ok(())
            } else {
                Err(crate::Error::other("api down"))
            }
        }
    }

    fn healthy_counts() -> QueueCounts {
        QueueCounts {
            waiting: 2,
            delayed: 1,
            active: 1,
            completed: 100,
            failed: 0,
        }
    }

    #[tokio::test]
    async fn all_probes_up_reports_healthy() {
        let source = FixedSource {
            redis_ok: true,
            redis_subscriber_ok: true,
            queue_counts: healthy_counts(),
            queue_counts_ok: true,
            dead_letter_count: 0,
            dead_letter_ok: true,
            api_ok: true,
        };
        let report = check_health(&source, "1.0.0", 42).await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.uptime_seconds, 42);
    }

    #[tokio::test]
    async fn a_down_probe_makes_the_whole_report_unhealthy() {
        let source = FixedSource {
            redis_ok: false,
            redis_subscriber_ok: true,
            queue_counts: healthy_counts(),
            queue_counts_ok: true,
            dead_letter_count: 0,
            dead_letter_ok: true,
            api_ok: true,
        };
        let report = check_health(&source, "1.0.0", 0).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.components.redis.status, ComponentState::Down);
    }

    #[tokio::test]
    async fn high_failure_ratio_degrades_the_queue_component_only() {
        let source = FixedSource {
            redis_ok: true,
            redis_subscriber_ok: true,
            queue_counts: QueueCounts {
                waiting: 0,
                delayed: 0,
                active: 0,
                completed: 0,
                failed: 5,
            },
            queue_counts_ok: true,
            dead_letter_count: 5,
            dead_letter_ok: true,
            api_ok: true,
        };
        let report = check_health(&source, "1.0.0", 0).await;
        assert_eq!(report.components.bull_queue.status, ComponentState::Degraded);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn empty_queue_is_up_not_degraded() {
        let source = FixedSource {
            redis_ok: true,
            redis_subscriber_ok: true,
            queue_counts: QueueCounts {
                waiting: 0,
                delayed: 0,
                active: 0,
                completed: 0,
                failed: 0,
            },
            queue_counts_ok: true,
            dead_letter_count: 0,
            dead_letter_ok: true,
            api_ok: true,
        };
        let report = check_health(&source, "1.0.0", 0).await;
        assert_eq!(report.components.bull_queue.status, ComponentState::Up);
    }
}
