//! Integration Manager error types.

use thiserror::Error;

use crate::failure::{ErrorKind, Failure};
use crate::workflow::{NodeError, WorkflowError, WorkflowFailure};

use super::capability::CapabilityKind;
use super::execution::ExecutionStatus;

/// Errors raised by capabilities, composite operations and execution tracking.
#[derive(Debug, Clone, Error)]
pub enum IntegrationError {
    /// Not registered, not initialized, or reporting itself unavailable.
    #[error("capability '{capability}' is unavailable: {reason}")]
    CapabilityUnavailable {
        capability: CapabilityKind,
        reason: String,
    },

    /// The capability ran and returned an error.
    #[error("capability '{capability}' failed: {reason}")]
    CapabilityFailed {
        capability: CapabilityKind,
        reason: String,
    },

    #[error("capability '{capability}' timed out after {timeout_ms}ms")]
    CapabilityTimeout {
        capability: CapabilityKind,
        timeout_ms: u64,
    },

    /// The request variant does not belong to this capability.
    #[error("capability '{capability}' does not support '{request}' requests")]
    UnsupportedRequest {
        capability: CapabilityKind,
        request: &'static str,
    },

    #[error("unknown workflow '{name}'")]
    UnknownWorkflow { name: String },

    #[error("unknown execution '{id}'")]
    UnknownExecution { id: String },

    #[error("invalid execution transition {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    /// A workflow could not be compiled.
    #[error(transparent)]
    InvalidWorkflow(#[from] WorkflowError),

    /// A workflow run failed; carries the partial state.
    #[error(transparent)]
    Workflow(#[from] WorkflowFailure),

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl IntegrationError {
    pub fn failed(capability: CapabilityKind, reason: impl Into<String>) -> Self {
        IntegrationError::CapabilityFailed {
            capability,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IntegrationError::CapabilityUnavailable { .. } => ErrorKind::CapabilityUnavailableError,
            IntegrationError::CapabilityFailed { .. } => ErrorKind::NodeExecutionError,
            IntegrationError::CapabilityTimeout { .. } => ErrorKind::TimeoutError,
            IntegrationError::InvalidWorkflow(e) => e.kind(),
            IntegrationError::Workflow(f) => f.kind(),
            IntegrationError::UnsupportedRequest { .. }
            | IntegrationError::UnknownWorkflow { .. }
            | IntegrationError::UnknownExecution { .. }
            | IntegrationError::InvalidTransition { .. }
            | IntegrationError::Database { .. }
            | IntegrationError::Serialization { .. } => ErrorKind::InternalError,
        }
    }

    /// Structured failure; workflow failures keep their partial state.
    pub fn to_failure(&self) -> Failure {
        match self {
            IntegrationError::Workflow(f) => f.to_failure(),
            other => Failure::new(other.kind(), other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for IntegrationError {
    fn from(e: rusqlite::Error) -> Self {
        IntegrationError::Database {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(e: serde_json::Error) -> Self {
        IntegrationError::Serialization {
            reason: e.to_string(),
        }
    }
}

impl From<IntegrationError> for NodeError {
    fn from(e: IntegrationError) -> Self {
        NodeError::new(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowState;

    #[test]
    fn unavailable_maps_to_its_own_kind() {
        let err = IntegrationError::CapabilityUnavailable {
            capability: CapabilityKind::Search,
            reason: "not initialized".into(),
        };
        assert_eq!(err.kind(), ErrorKind::CapabilityUnavailableError);
        assert!(err.to_string().contains("search"));
    }

    #[test]
    fn workflow_failure_keeps_partial_state() {
        let failure = WorkflowFailure::new(
            WorkflowError::NoMatchingEdge { node: "x".into() },
            WorkflowState::new("wf", "text"),
        );
        let err = IntegrationError::from(failure);
        let structured = err.to_failure();
        assert_eq!(structured.kind, ErrorKind::NoMatchingEdgeError);
        assert!(structured.partial_state.is_some());
    }

    #[test]
    fn store_errors_convert_to_database_failures() {
        let err = IntegrationError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, IntegrationError::Database { .. }));
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }
}
