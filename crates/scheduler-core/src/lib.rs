pub mod alerting;
pub mod config;
pub mod cron;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod graphql;
pub mod health;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod pubsub_bridge;
pub mod redis;

pub use config::Config;
pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_available() {
        assert!(!VERSION.is_empty());
    }
}
