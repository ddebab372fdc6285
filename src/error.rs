/*!
 * Error types for riaktive
 */

use crate::protocol::RpcError;
use riaktive_core_readiness::ProvisionError;
use riaktive_core_resilience::PoolError;
use std::io;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RiaktiveError>;

/// Errors returned by client and bucket operations
///
/// An operation error only rejects the call that produced it; the bucket and
/// the pool keep serving other callers.
#[derive(Debug, Error)]
pub enum RiaktiveError {
    /// No connection could be obtained
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The node rejected or failed a request
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The bucket could not be provisioned
    #[error(transparent)]
    Provision(#[from] Arc<ProvisionError>),

    #[error("Cannot mutate - no document with key \"{key}\" in bucket \"{bucket}\"")]
    MissingDocument { bucket: String, key: String },

    #[error("Cannot mutate - siblings exist for key \"{key}\" in bucket \"{bucket}\"")]
    SiblingMutation { bucket: String, key: String },

    #[error("Mutate for key \"{key}\" in bucket \"{bucket}\" failed with: {source}")]
    MutationFailed {
        bucket: String,
        key: String,
        #[source]
        source: Box<RiaktiveError>,
    },

    #[error("Multi-delete isn't supported")]
    MultiDelete,

    /// A document without an `id` was given where a key is required
    #[error("Document has no id")]
    MissingKey,

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The bucket's controller went away before answering
    #[error("Operation on bucket '{0}' was abandoned")]
    Abandoned(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProvisionError> for RiaktiveError {
    fn from(err: ProvisionError) -> Self {
        RiaktiveError::Provision(Arc::new(err))
    }
}

impl RiaktiveError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RiaktiveError::Pool(e) => e.is_transient(),
            RiaktiveError::Rpc(e) => e.is_transient(),
            RiaktiveError::Provision(e) => e.is_transient(),
            RiaktiveError::MutationFailed { source, .. } => source.is_transient(),
            RiaktiveError::Io(_) => true,
            _ => false,
        }
    }

    /// Bucket a per-document error refers to, if any
    pub fn bucket(&self) -> Option<&str> {
        match self {
            RiaktiveError::MissingDocument { bucket, .. }
            | RiaktiveError::SiblingMutation { bucket, .. }
            | RiaktiveError::MutationFailed { bucket, .. } => Some(bucket),
            RiaktiveError::Abandoned(bucket) => Some(bucket),
            RiaktiveError::Provision(e) => Some(e.resource()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_message_is_preserved() {
        let err = RiaktiveError::from(PoolError::AllNodesUnreachable);
        assert_eq!(err.to_string(), "All nodes were unreachable.");
        assert!(err.is_transient());
    }

    #[test]
    fn test_mutation_failure_wraps_cause() {
        let err = RiaktiveError::MutationFailed {
            bucket: "users".into(),
            key: "u1".into(),
            source: Box::new(RpcError::Node("overload".into()).into()),
        };
        assert_eq!(
            err.to_string(),
            "Mutate for key \"u1\" in bucket \"users\" failed with: Node error: overload"
        );
        assert_eq!(err.bucket(), Some("users"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_document_message() {
        let err = RiaktiveError::MissingDocument {
            bucket: "users".into(),
            key: "nope".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot mutate - no document with key \"nope\" in bucket \"users\""
        );
    }
}
