use std::fmt;

/// Crate-wide error type. Hand-rolled rather than `thiserror`-derived: this is
/// the error that crosses every module boundary into `main`, and carries
/// conversions from every leaf error type in the crate.
#[derive(Debug)]
pub enum Error {
    /// Missing/invalid environment configuration. Carries every offending key,
    /// not just the first one found.
    Config(String),

    /// The Redis-compatible backing store is unreachable or returned a driver error.
    QueueUnavailable(String),

    /// Network, timeout, or transport-level failure talking to the GraphQL API.
    Network(String),

    /// The GraphQL API responded with a non-empty `errors` array.
    GraphQl(Vec<String>),

    /// A value that must not be null under the operation's contract was null.
    EmptyResult(String),

    /// The circuit breaker refused the call.
    CircuitOpen,

    /// A job kind present in the queue has no known decoder.
    UnknownKind(String),

    /// A job's payload could not be decoded for its declared kind.
    BadPayload(String),

    /// Requested entity does not exist.
    NotFound(String),

    /// Generic validation failure.
    Validation(String),

    /// Serialization/deserialization failure.
    Serialization(serde_json::Error),

    /// Filesystem/IO failure.
    Io(std::io::Error),

    /// Catch-all for conditions that don't warrant a dedicated variant.
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::QueueUnavailable(msg) => write!(f, "queue unavailable: {}", msg),
            Error::Network(msg) => write!(f, "network error: {}", msg),
            Error::GraphQl(messages) => write!(f, "graphql error: {}", messages.join("; ")),
            Error::EmptyResult(op) => write!(f, "empty result for operation: {}", op),
            Error::CircuitOpen => write!(f, "circuit breaker is open"),
            Error::UnknownKind(kind) => write!(f, "unknown job kind: {}", kind),
            Error::BadPayload(msg) => write!(f, "bad job payload: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::Validation(msg) => write!(f, "validation error: {}", msg),
            Error::Serialization(e) => write!(f, "serialization error: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(error: redis::RedisError) -> Self {
        Error::QueueUnavailable(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Validation(format!("invalid id: {}", error))
    }
}

impl From<cron::error::Error> for Error {
    fn from(error: cron::error::Error) -> Self {
        Error::Validation(format!("invalid cron expression: {}", error))
    }
}

impl From<crate::jobs::JobError> for Error {
    fn from(error: crate::jobs::JobError) -> Self {
        match error {
            crate::jobs::JobError::Queue(msg) => Error::QueueUnavailable(msg),
            crate::jobs::JobError::BadPayload(msg) => Error::BadPayload(msg),
            crate::jobs::JobError::UnknownKind(msg) => Error::UnknownKind(msg),
            crate::jobs::JobError::NotFound(msg) => Error::NotFound(msg),
            other => Error::Other(other.to_string()),
        }
    }
}

impl From<crate::graphql::GraphQlError> for Error {
    fn from(error: crate::graphql::GraphQlError) -> Self {
        match error {
            crate::graphql::GraphQlError::GraphQl(messages) => Error::GraphQl(messages),
            crate::graphql::GraphQlError::EmptyResult(op) => Error::EmptyResult(op),
            crate::graphql::GraphQlError::Transport(msg) => Error::Network(msg),
            crate::graphql::GraphQlError::CircuitOpen => Error::CircuitOpen,
        }
    }
}

impl From<crate::health::HealthError> for Error {
    fn from(error: crate::health::HealthError) -> Self {
        Error::Other(error.to_string())
    }
}

impl Error {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn other<T: Into<String>>(msg: T) -> Self {
        Error::Other(msg.into())
    }

    /// Coarse category, used for metrics/alert labeling.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::QueueUnavailable(_) => "queue_unavailable",
            Error::Network(_) => "network",
            Error::GraphQl(_) => "graphql",
            Error::EmptyResult(_) => "empty_result",
            Error::CircuitOpen => "circuit_open",
            Error::UnknownKind(_) => "unknown_kind",
            Error::BadPayload(_) => "bad_payload",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}
