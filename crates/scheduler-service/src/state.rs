//! Shared application state (C12, §4.11/§4.12). Grounded on the teacher's
//! `AppState` (a plain struct of already-constructed services passed into
//! `with_state`), generalized to the scheduler's handler/metrics surface and
//! made the concrete [`MetricsSource`] implementation health checks run
//! against.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use scheduler_core::domain::HandlerContext;
use scheduler_core::health::MetricsSource;
use scheduler_core::jobs::QueueCounts;
use scheduler_core::metrics::ProcessMonitor;
use scheduler_core::redis::{PubSubConnection, RedisPool};
use scheduler_core::{Result, VERSION};

#[derive(Clone)]
pub struct AppState {
    pub ctx: HandlerContext,
    pool: RedisPool,
    process: Arc<ProcessMonitor>,
    started_at: Instant,
}

impl AppState {
    pub fn new(ctx: HandlerContext, pool: RedisPool) -> Self {
        Self {
            ctx,
            pool,
            process: Arc::new(ProcessMonitor::new()),
            started_at: Instant::now(),
        }
    }

    pub fn process(&self) -> &Arc<ProcessMonitor> {
        &self.process
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[async_trait]
impl MetricsSource for AppState {
    async fn queue_counts(&self) -> Result<QueueCounts> {
        Ok(self.ctx.queue.counts().await?)
    }

    async fn dead_letter_count(&self) -> Result<u64> {
        Ok(self.ctx.queue.dead_letter().count().await?)
    }

    async fn ping_redis(&self) -> Result<()> {
        self.pool.ping().await.map_err(scheduler_core::Error::from)?;
        Ok(())
    }

    async fn ping_redis_subscriber(&self) -> Result<()> {
        PubSubConnection::open(&self.pool).await.map(|_| ())
    }

    async fn ping_api(&self) -> Result<()> {
        self.ctx.graphql.get_all_campaign_ids().await?;
        Ok(())
    }
}
