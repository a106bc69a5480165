//! Metrics (C8, §4.8): a structured JSON snapshot and a Prometheus text
//! exposition built from the same queue/DLQ/health/process figures.
//! Process-level gauges are grounded on the teacher's
//! `performance::monitor::ResourceMonitor` (`System::new_all()`,
//! `refresh_all()`, `system.process(pid)`); Rust has no V8-style
//! heap/external split, so `heap_used`/`heap_total` both report the process
//! RSS and `external` is always 0 — kept as separate labels purely for
//! exposition-format compatibility with the contract in §4.8.

use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Pid, System};

use crate::health::HealthReport;
use crate::jobs::QueueCounts;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProcessMetrics {
    #[serde(rename = "cpuUsagePercent")]
    pub cpu_usage_percent: f64,
    #[serde(rename = "rssBytes")]
    pub rss_bytes: u64,
}

/// Wraps a `sysinfo::System` behind a mutex so a `ProcessMonitor` can be
/// shared as `Arc<ProcessMonitor>` across the health/metrics HTTP handlers.
pub struct ProcessMonitor {
    system: Mutex<System>,
    pid: usize,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        let pid = sysinfo::get_current_pid().map(|p| p.as_u32() as usize).unwrap_or(0);
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            system: Mutex::new(system),
            pid,
        }
    }
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&self) -> ProcessMetrics {
        let mut system = self.system.lock().expect("process monitor mutex poisoned");
        system.refresh_all();
        match system.process(Pid::from(self.pid)) {
            Some(process) => ProcessMetrics {
                cpu_usage_percent: process.cpu_usage() as f64,
                rss_bytes: process.memory(),
            },
            None => ProcessMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub queue: QueueCounts,
    #[serde(rename = "deadLetterCount")]
    pub dead_letter_count: u64,
    pub process: ProcessMetrics,
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    pub fn new(queue: QueueCounts, dead_letter_count: u64, process: ProcessMetrics, uptime_seconds: u64) -> Self {
        Self {
            queue,
            dead_letter_count,
            process,
            uptime_seconds,
        }
    }
}

/// Renders the exposition text named in §4.8. `health` supplies the overall
/// and per-component status gauges; everything else comes from `snapshot`.
pub fn render_prometheus(snapshot: &MetricsSnapshot, health: &HealthReport) -> String {
    let mut out = String::new();

    out.push_str("# TYPE scheduler_queue_active gauge\n");
    out.push_str(&format!("scheduler_queue_active {}\n", snapshot.queue.active));
    out.push_str("# TYPE scheduler_queue_waiting gauge\n");
    out.push_str(&format!("scheduler_queue_waiting {}\n", snapshot.queue.waiting));
    out.push_str("# TYPE scheduler_queue_completed counter\n");
    out.push_str(&format!("scheduler_queue_completed {}\n", snapshot.queue.completed));
    out.push_str("# TYPE scheduler_queue_failed counter\n");
    out.push_str(&format!("scheduler_queue_failed {}\n", snapshot.queue.failed));
    out.push_str("# TYPE scheduler_queue_delayed gauge\n");
    out.push_str(&format!("scheduler_queue_delayed {}\n", snapshot.queue.delayed));

    out.push_str("# TYPE scheduler_dead_letter_count gauge\n");
    out.push_str(&format!("scheduler_dead_letter_count {}\n", snapshot.dead_letter_count));

    out.push_str("# TYPE scheduler_health_status gauge\n");
    out.push_str(&format!("scheduler_health_status {}\n", health.status.as_gauge()));

    out.push_str("# TYPE scheduler_component_status gauge\n");
    for (component, state) in [
        ("redis", health.components.redis.status),
        ("redisSubscriber", health.components.redis_subscriber.status),
        ("bullQueue", health.components.bull_queue.status),
        ("api", health.components.api.status),
    ] {
        out.push_str(&format!("scheduler_component_status{{component=\"{}\"}} {}\n", component, state.as_gauge()));
    }

    out.push_str("# TYPE scheduler_uptime_seconds counter\n");
    out.push_str(&format!("scheduler_uptime_seconds {}\n", snapshot.uptime_seconds));

    out.push_str("# TYPE process_cpu_usage_percent gauge\n");
    out.push_str(&format!("process_cpu_usage_percent {}\n", snapshot.process.cpu_usage_percent));

    out.push_str("# TYPE process_memory_usage_bytes gauge\n");
    for kind in ["rss", "heap_used", "heap_total"] {
        out.push_str(&format!(
            "process_memory_usage_bytes{{type=\"{}\"}} {}\n",
            kind, snapshot.process.rss_bytes
        ));
    }
    out.push_str("process_memory_usage_bytes{type=\"external\"} 0\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ComponentHealth, ComponentState, Components, HealthStatus};

    fn health_report() -> HealthReport {
        let component = |status| ComponentHealth {
            status,
            message: "ok".to_string(),
            last_checked: chrono::Utc::now(),
        };
        HealthReport {
            status: HealthStatus::Healthy,
            timestamp: chrono::Utc::now(),
            version: "1.0.0".to_string(),
            uptime_seconds: 10,
            components: Components {
                redis: component(ComponentState::Up),
                redis_subscriber: component(ComponentState::Up),
                bull_queue: component(ComponentState::Up),
                api: component(ComponentState::Up),
            },
        }
    }

    #[test]
    fn rendered_output_contains_every_named_metric() {
        let snapshot = MetricsSnapshot::new(
            QueueCounts {
                waiting: 1,
                delayed: 2,
                active: 3,
                completed: 4,
                failed: 5,
            },
            1,
            ProcessMetrics {
                cpu_usage_percent: 12.5,
                rss_bytes: 1024,
            },
            600,
        );
        let text = render_prometheus(&snapshot, &health_report());

        for metric in [
            "scheduler_queue_active 3",
            "scheduler_queue_waiting 1",
            "scheduler_queue_completed 4",
            "scheduler_queue_failed 5",
            "scheduler_queue_delayed 2",
            "scheduler_dead_letter_count 1",
            "scheduler_health_status 0",
            "scheduler_component_status{component=\"redis\"} 0",
            "scheduler_uptime_seconds 600",
            "process_cpu_usage_percent 12.5",
            "process_memory_usage_bytes{type=\"rss\"} 1024",
            "process_memory_usage_bytes{type=\"heap_used\"} 1024",
            "process_memory_usage_bytes{type=\"external\"} 0",
        ] {
            assert!(text.contains(metric), "missing metric line: {}", metric);
        }
    }

    #[test]
    fn process_monitor_samples_without_panicking() {
        let monitor = ProcessMonitor::new();
        let sample = monitor.sample();
        assert!(sample.cpu_usage_percent >= 0.0);
    }
}
