//! Startup/shutdown orchestration (C10, §4.10). Generalizes the main binary's
//! `tokio::main` shape (config, then build state, then serve) into an
//! explicit ordered handle: `Application::start` spins up the dispatcher,
//! cron scheduler, and pub/sub bridge in order; `Application::shutdown` tears
//! them down in reverse, bounded by a deadline raced via `tokio::select!`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alerting::AlertManager;
use crate::config::Config;
use crate::cron::CronScheduler;
use crate::dispatcher::Dispatcher;
use crate::domain::HandlerContext;
use crate::pubsub_bridge::PubSubBridge;
use crate::redis::RedisPool;

/// Owns every background component started after the GraphQL client and
/// queue: workers, cron firings, and the pub/sub bridge. The HTTP listener
/// itself is built and served by `scheduler-service`, which holds this
/// handle alongside it and calls [`Application::shutdown`] once it stops
/// accepting new requests.
pub struct Application {
    dispatcher: Dispatcher,
    dispatcher_handles: Vec<JoinHandle<()>>,
    cron: Arc<CronScheduler>,
    cron_handles: Vec<JoinHandle<()>>,
    bridge: PubSubBridge,
    bridge_handle: JoinHandle<()>,
}

impl Application {
    /// Starts the dispatcher, the cron scheduler (with the three default
    /// tasks registered from `config.cron`), and the pub/sub bridge, in that
    /// order (§4.10).
    pub async fn start(
        ctx: HandlerContext,
        pool: RedisPool,
        config: &Config,
        alerts: Arc<AlertManager>,
    ) -> crate::Result<Self> {
        let dispatcher = Dispatcher::new(ctx.clone(), config.queue.concurrency);
        let dispatcher_handles = dispatcher.spawn();
        info!(workers = config.queue.concurrency, "dispatcher started");

        let cron = Arc::new(
            CronScheduler::new(ctx.clone(), alerts.clone(), config.environment.is_production())
                .with_default_tasks(&config.cron)
                .await
                .map_err(|e| crate::Error::config(e.to_string()))?,
        );
        let cron_handles = cron.spawn().await;
        info!("cron scheduler started");

        let bridge = PubSubBridge::new(pool, ctx.queue.clone(), alerts)
            .with_queue_defaults(ctx.queue_defaults.clone());
        let bridge_handle = bridge.spawn();
        info!("pub/sub bridge started");

        Ok(Self {
            dispatcher,
            dispatcher_handles,
            cron,
            cron_handles,
            bridge,
            bridge_handle,
        })
    }

    pub fn cron(&self) -> &Arc<CronScheduler> {
        &self.cron
    }

    /// Stops every component in reverse startup order: pub/sub bridge, then
    /// cron firings, then the worker pool drains its in-flight jobs. Returns
    /// `true` if the drain finished within `deadline`, `false` if it was cut
    /// short — the caller is expected to `std::process::exit(1)` in that case
    /// per §6's exit-code contract.
    pub async fn shutdown(self, deadline: Duration) -> bool {
        let Self {
            dispatcher,
            dispatcher_handles,
            cron: _cron,
            cron_handles,
            bridge,
            bridge_handle,
        } = self;

        let drain = async move {
            bridge.stop();
            let _ = bridge_handle.await;
            info!("pub/sub bridge stopped");

            for handle in cron_handles {
                handle.abort();
            }
            info!("cron scheduler stopped");

            dispatcher.stop();
            for handle in dispatcher_handles {
                let _ = handle.await;
            }
            info!("dispatcher drained");
        };

        tokio::select! {
            _ = drain => true,
            _ = tokio::time::sleep(deadline) => {
                warn!(?deadline, "shutdown deadline exceeded, components may still be draining");
                false
            }
        }
    }
}

/// Resolves once either `SIGINT` or `SIGTERM` is received. `SIGTERM` is
/// Unix-only; the platform-specific listener is set up here rather than
/// exposed to the caller (§4.10 implementation note).
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, CronConfig, Environment, LogLevel, QueueConfig};
    use crate::graphql::GraphQlClient;
    use crate::jobs::JobQueue;

    fn test_config() -> Config {
        Config {
            environment: Environment::Development,
            port: 9266,
            log_level: LogLevel::Info,
            redis_url: "redis://127.0.0.1:6379/15".to_string(),
            cron: CronConfig {
                event_expiration: "*/5 * * * *".to_string(),
                settlement_growth: "0 * * * *".to_string(),
                structure_maintenance: "0 * * * *".to_string(),
            },
            queue: QueueConfig {
                max_retries: 3,
                retry_backoff_ms: 5000,
                concurrency: 1,
            },
            api: ApiConfig {
                url: "http://localhost:1/graphql".to_string(),
                service_account_token: "test-token".to_string(),
                request_timeout_ms: 1000,
                circuit_breaker_threshold: 5,
                circuit_breaker_duration_ms: 30_000,
            },
        }
    }

    // Mirrors the graceful-skip pattern used throughout the crate: these
    // assertions only run when a local Redis is reachable.
    #[tokio::test]
    async fn starting_and_shutting_down_an_application_does_not_panic() {
        if let Ok(pool) = RedisPool::new("redis://127.0.0.1:6379/15").await {
            let queue = Arc::new(JobQueue::new(pool.clone()));
            let graphql = Arc::new(
                GraphQlClient::new("http://localhost:1/graphql", "test-token", 1000, Duration::from_secs(30)).unwrap(),
            );
            let ctx = HandlerContext::new(graphql, queue);
            let config = test_config();
            let alerts = Arc::new(AlertManager::new());

            let app = Application::start(ctx, pool, &config, alerts).await.unwrap();
            let finished = app.shutdown(Duration::from_secs(5)).await;
            assert!(finished);
        }
    }
}
