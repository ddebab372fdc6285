//! Error types for the resilience layer

use std::time::Duration;
use thiserror::Error;

/// Errors a connection factory reports for a single connection attempt
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// The node refused or dropped the connection attempt
    #[error("Failed to connect to {node}: {reason}")]
    ConnectionFailed { node: String, reason: String },

    /// Attempt did not complete within the node's connect timeout
    #[error("Connection attempt to {node} timed out after {timeout:?}")]
    Timeout { node: String, timeout: Duration },

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl ResilienceError {
    /// Create a connection failure for `node`
    pub fn connection_failed(node: impl Into<String>, reason: impl Into<String>) -> Self {
        ResilienceError::ConnectionFailed {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::ConnectionFailed { .. }
                | ResilienceError::Timeout { .. }
                | ResilienceError::Transient(_)
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(self, ResilienceError::Permanent(_))
    }
}

/// Errors returned to callers waiting on the connection pool
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every configured node exceeded its retry budget
    #[error("All nodes were unreachable.")]
    AllNodesUnreachable,

    /// The pool was closed while the request was pending, or before it was made
    #[error("Connection pool has been closed")]
    Closed,
}

impl PoolError {
    /// Exhaustion clears after `restart()` or `add_node()`; a closed pool stays closed
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::AllNodesUnreachable)
    }
}
