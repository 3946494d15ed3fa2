//! Error taxonomy for the orchestration core.
//!
//! Structural errors (duplicate or unknown names, invalid workflow graphs)
//! are returned to callers. Operational failures of individual steps never
//! surface here; they are recorded on the [`WorkflowRun`](crate::domain::WorkflowRun).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::adapters::IntegrationError;

/// What kind of named object an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Integration,
    Workflow,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integration => f.write_str("integration"),
            Self::Workflow => f.write_str("workflow"),
        }
    }
}

/// Errors raised by the registry, orchestrator and trigger wiring
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} '{name}' is already defined")]
    DuplicateName { kind: NameKind, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: NameKind, name: String },

    #[error("invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("integration '{integration}' does not support action '{action}'")]
    ActionNotSupported { integration: String, action: String },

    #[error("integration '{integration}' failed: {source}")]
    Integration {
        integration: String,
        #[source]
        source: IntegrationError,
    },

    #[error("step '{step}' timed out after {}ms", .after.as_millis())]
    Timeout { step: String, after: Duration },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn duplicate(kind: NameKind, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn not_found(kind: NameKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn invalid_workflow(workflow: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkflow {
            workflow: workflow.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::duplicate(NameKind::Integration, "slack");
        assert_eq!(err.to_string(), "integration 'slack' is already defined");

        let err = Error::not_found(NameKind::Workflow, "onboarding");
        assert_eq!(err.to_string(), "workflow 'onboarding' not found");

        let err = Error::Timeout {
            step: "create_account".to_string(),
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "step 'create_account' timed out after 1500ms");
    }
}
