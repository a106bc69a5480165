//! Redis connection management (C1/ambient).
//!
//! `redis::aio::ConnectionManager` already multiplexes commands over a single
//! connection and transparently reconnects with its own backoff, so unlike
//! the teacher's hand-rolled reconnect-and-retry wrapper around it, this pool
//! is a thin, cloneable handle: `get()` just clones the manager. The one
//! thing the manager can't do is hand out a dedicated `PubSub` connection,
//! which is why [`crate::redis::pubsub`] opens its own connection straight
//! off the [`redis::Client`].

use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};

use crate::error::{Error, Result};

/// A connection borrowed from the pool. `ConnectionManager` implements
/// `redis::aio::ConnectionLike`, so callers use it directly with
/// `redis::AsyncCommands` or `redis::pipe().query_async`.
pub type RedisConnection = ConnectionManager;

#[derive(Clone)]
pub struct RedisPool {
    client: Arc<Client>,
    manager: ConnectionManager,
}

impl RedisPool {
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(Error::from)?;
        let manager = ConnectionManager::new(client.clone()).await.map_err(Error::from)?;
        Ok(Self {
            client: Arc::new(client),
            manager,
        })
    }

    /// Returns a cheap clone of the managed connection.
    pub async fn get(&self) -> Result<RedisConnection> {
        Ok(self.manager.clone())
    }

    /// Opens a fresh, dedicated connection for `SUBSCRIBE`/`PSUBSCRIBE` — the
    /// pub/sub bridge (C6) owns this connection for its entire lifetime and
    /// never shares it with command traffic.
    pub async fn pubsub_connection(&self) -> Result<redis::aio::PubSub> {
        let conn = self.client.get_async_pubsub().await.map_err(Error::from)?;
        Ok(conn)
    }

    pub async fn ping(&self) -> RedisResult<String> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async(&mut conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_connection_is_the_connection_manager() {
        fn assert_connection_like<T: redis::aio::ConnectionLike>() {}
        assert_connection_like::<RedisConnection>();
    }
}
