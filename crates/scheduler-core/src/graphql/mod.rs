//! The resilient GraphQL client (C2): pooled HTTP, a circuit breaker, and
//! small TTL caches in front of the typed operations in §6.

pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod types;

pub use client::{GraphQlClient, GraphQlTransport};

/// Leaf error type for the GraphQL subsystem (§4.5).
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphQlError {
    #[error("graphql error: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    #[error("empty result for operation: {0}")]
    EmptyResult(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("circuit breaker is open")]
    CircuitOpen,
}
