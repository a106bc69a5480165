//! A dedicated `SUBSCRIBE`/`PSUBSCRIBE` connection (C6). The teacher's
//! `cache/pubsub.rs` never actually subscribes to Redis — it spawns a task
//! that logs and returns, leaving the broadcast path entirely local. This is
//! a full reimplementation against `redis::aio::PubSub`.

use futures::Stream;
use redis::Msg;

use crate::error::{Error, Result};
use crate::redis::RedisPool;

pub struct PubSubConnection {
    inner: redis::aio::PubSub,
}

impl PubSubConnection {
    /// Opens a new, dedicated connection. Call this again to reconnect —
    /// a `PubSubConnection` does not resubscribe itself.
    pub async fn open(pool: &RedisPool) -> Result<Self> {
        let inner = pool.pubsub_connection().await?;
        Ok(Self { inner })
    }

    pub async fn psubscribe(&mut self, pattern: &str) -> Result<()> {
        self.inner.psubscribe(pattern).await.map_err(Error::from)
    }

    pub async fn subscribe(&mut self, channel: &str) -> Result<()> {
        self.inner.subscribe(channel).await.map_err(Error::from)
    }

    /// Consumes the connection, handing back an owned stream of messages.
    /// Dropping the stream closes the underlying connection.
    pub fn into_message_stream(self) -> impl Stream<Item = Msg> {
        self.inner.into_on_message()
    }
}
