//! Typed, validated access to the process environment (C1).
//!
//! Unlike the wider platform this service was extracted from, there is no TOML
//! file layer here: every setting in §6 of the spec comes from an environment
//! variable, read once at startup into an immutable [`Config`].

use std::env;

use crate::error::{Error, Result};

/// Deployment mode, mirrors `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw {
            "production" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CronConfig {
    pub event_expiration: String,
    pub settlement_growth: String,
    pub structure_maintenance: String,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub url: String,
    pub service_account_token: String,
    pub request_timeout_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub port: u16,
    pub log_level: LogLevel,
    pub redis_url: String,
    pub cron: CronConfig,
    pub queue: QueueConfig,
    pub api: ApiConfig,
}

fn default_port() -> u16 {
    9266
}

impl Config {
    /// Load from the process environment, collecting every missing required
    /// key before failing so the startup error lists all of them at once.
    pub fn from_env() -> Result<Self> {
        let mut missing = Vec::new();

        let redis_url = require_env("REDIS_URL", &mut missing);
        let api_url = require_env("API_URL", &mut missing);
        let api_token = require_env("API_SERVICE_ACCOUNT_TOKEN", &mut missing);

        if !missing.is_empty() {
            return Err(Error::config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let environment = env::var("NODE_ENV")
            .ok()
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_port);

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .map(|v| LogLevel::parse(&v))
            .unwrap_or(LogLevel::Info);

        let cron = CronConfig {
            event_expiration: env::var("CRON_EVENT_EXPIRATION")
                .unwrap_or_else(|_| "*/5 * * * *".to_string()),
            settlement_growth: env::var("CRON_SETTLEMENT_GROWTH")
                .unwrap_or_else(|_| "0 * * * *".to_string()),
            structure_maintenance: env::var("CRON_STRUCTURE_MAINTENANCE")
                .unwrap_or_else(|_| "0 * * * *".to_string()),
        };

        let queue = QueueConfig {
            max_retries: parse_env_or("QUEUE_MAX_RETRIES", 3),
            retry_backoff_ms: parse_env_or("QUEUE_RETRY_BACKOFF_MS", 5000),
            concurrency: parse_env_or("QUEUE_CONCURRENCY", 5),
        };

        let api = ApiConfig {
            url: api_url.unwrap(),
            service_account_token: api_token.unwrap(),
            request_timeout_ms: parse_env_or("API_REQUEST_TIMEOUT_MS", 10_000),
            circuit_breaker_threshold: parse_env_or("API_CIRCUIT_BREAKER_THRESHOLD", 5),
            circuit_breaker_duration_ms: parse_env_or("API_CIRCUIT_BREAKER_DURATION_MS", 30_000),
        };

        let config = Config {
            environment,
            port,
            log_level,
            redis_url: redis_url.unwrap(),
            cron,
            queue,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Range-checks the fields that can't be caught by parsing alone.
    pub fn validate(&self) -> Result<()> {
        if self.queue.concurrency == 0 {
            return Err(Error::config("QUEUE_CONCURRENCY must be at least 1"));
        }
        if self.api.request_timeout_ms == 0 {
            return Err(Error::config("API_REQUEST_TIMEOUT_MS must be at least 1"));
        }
        if self.port == 0 {
            return Err(Error::config("PORT must be a valid nonzero port"));
        }
        Ok(())
    }

    pub fn tracing_directive(&self) -> String {
        format!(
            "scheduler_core={level},scheduler_service={level},tower_http=warn",
            level = self.log_level.as_directive()
        )
    }
}

fn require_env(key: &str, missing: &mut Vec<String>) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => {
            missing.push(key.to_string());
            None
        }
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
