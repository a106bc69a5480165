//! Entry point (C12, §4.10/§4.12/§6). Grounded on the teacher's `main.rs`
//! (`tracing_subscriber::fmt().with_env_filter(...).init()` then hand off to
//! the async runtime), trimmed to a single mode of operation: no CLI
//! subcommands, since this binary only ever runs the scheduler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use scheduler_core::domain::HandlerContext;
use scheduler_core::graphql::GraphQlClient;
use scheduler_core::jobs::{EnqueueOptions, JobQueue};
use scheduler_core::lifecycle::{wait_for_shutdown_signal, Application};
use scheduler_core::redis::RedisPool;
use scheduler_core::{alerting::AlertManager, Config};
use scheduler_service::{build_router, AppState};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("scheduler-service failed to start: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> scheduler_core::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.tracing_directive()))
        .with_target(false)
        .init();

    tracing::info!(
        environment = ?config.environment,
        port = config.port,
        "starting scheduler-service"
    );

    let alerts = Arc::new(AlertManager::new());

    let pool = RedisPool::new(&config.redis_url).await?;

    let graphql = Arc::new(
        GraphQlClient::new(
            config.api.url.clone(),
            config.api.service_account_token.clone(),
            config.api.request_timeout_ms,
            Duration::from_millis(config.api.circuit_breaker_duration_ms),
        )?
        .with_alerts(alerts.clone()),
    );

    let queue = Arc::new(JobQueue::new(pool.clone()).with_alerts(alerts.clone()));

    let ctx = HandlerContext::new(graphql, queue)
        .with_queue_defaults(EnqueueOptions::from_config(&config.queue));
    let state = Arc::new(AppState::new(ctx.clone(), pool.clone()));

    let app = Application::start(ctx, pool, &config, alerts).await?;

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(scheduler_core::Error::from)?;

    tracing::info!(%addr, "listening");

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await;

    if let Err(e) = serve_result {
        tracing::error!(error = %e, "http server exited with error");
    }

    let finished = app.shutdown(SHUTDOWN_DEADLINE).await;
    if !finished {
        std::process::exit(1);
    }

    Ok(())
}
