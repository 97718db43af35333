//! Error types for the market-data feed
//!
//! One taxonomy shared by the live session, the query path, the provider
//! cascade and the persistence ports.

use thiserror::Error;

/// Top-level feed error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// Upstream gateway or store unreachable, or the connection was reset.
    #[error("Connection error: {0}")]
    Connection(String),

    /// One provider in the cascade failed.
    #[error("Provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    /// Rendered as the bare `open` that degraded query results carry.
    #[error("open")]
    CircuitOpen,

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Too many concurrent requests (limit {limit})")]
    Backpressure { limit: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FeedError {
    /// Timeouts and dropped connections are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Timeout { .. } | FeedError::Connection(_))
    }

    /// Reclassify an exhausted timeout as a failure of the named source.
    pub fn into_provider_error(self, provider: &str) -> FeedError {
        match self {
            FeedError::Timeout { .. } => FeedError::Provider {
                provider: provider.to_string(),
                reason: self.to_string(),
            },
            other => other,
        }
    }
}
