//! Error types for resource provisioning

use std::fmt;
use thiserror::Error;

/// Provisioning step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Schema,
    Index,
    Properties,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Schema => "schema",
            Step::Index => "search index",
            Step::Properties => "bucket properties",
        };
        f.write_str(name)
    }
}

/// Errors surfaced while provisioning a resource
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A provisioning step failed; the controller stays in its state until retried
    #[error("Provisioning '{resource}' failed at {step}: {source:#}")]
    Step {
        resource: String,
        step: Step,
        #[source]
        source: anyhow::Error,
    },

    /// The controller task is gone, so queued work can no longer run
    #[error("Readiness controller for '{0}' has stopped")]
    Stopped(String),
}

impl ProvisionError {
    pub fn step(resource: impl Into<String>, step: Step, source: anyhow::Error) -> Self {
        ProvisionError::Step {
            resource: resource.into(),
            step,
            source,
        }
    }

    /// Name of the resource being provisioned
    pub fn resource(&self) -> &str {
        match self {
            ProvisionError::Step { resource, .. } => resource,
            ProvisionError::Stopped(resource) => resource,
        }
    }

    /// Step failures can be retried; a stopped controller cannot
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::Step { .. })
    }
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_names_resource_and_step() {
        let err = ProvisionError::step(
            "users",
            Step::Index,
            anyhow::anyhow!("timeout").context("creating index users_index"),
        );
        assert_eq!(err.resource(), "users");
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "Provisioning 'users' failed at search index: creating index users_index: timeout"
        );
    }
}
