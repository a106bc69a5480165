//! Redis access (ambient): a cloneable command pool ([`RedisPool`]) and a
//! dedicated pub/sub connection opener, shared by the job queue (C3), the
//! dead-letter sink, and the reactivity bridge (C6).

pub mod pool;
pub mod pubsub;

pub use pool::{RedisConnection, RedisPool};
pub use pubsub::PubSubConnection;
