//! Workflow engine error types.

use thiserror::Error;

use crate::failure::{ErrorKind, Failure};

use super::state::WorkflowState;

/// Error returned by a node body.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct NodeError {
    pub message: String,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("serialization error: {e}"))
    }
}

/// Errors raised while building or running a workflow.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// A node returned an error.
    #[error("node '{node}' failed: {reason}")]
    NodeExecution { node: String, reason: String },

    /// No outgoing edge predicate matched and no error handler is declared.
    #[error("no matching edge out of '{node}'")]
    NoMatchingEdge { node: String },

    /// Step budget, run timeout or node timeout exceeded.
    #[error("timeout: {reason}")]
    Timeout { reason: String },

    /// The graph failed validation at compile time.
    #[error("malformed workflow graph: {reason}")]
    MalformedGraph { reason: String },

    /// A node's patch wrote a reserved key or a key outside its declared outputs.
    #[error("node '{node}' violated its output schema: {reason}")]
    SchemaViolation { node: String, reason: String },

    /// Cancelled at a node boundary (`node` is the step that would have run next).
    #[error("workflow cancelled at '{node}'")]
    Cancelled { node: String },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NodeExecution { .. } | WorkflowError::SchemaViolation { .. } => {
                ErrorKind::NodeExecutionError
            }
            WorkflowError::NoMatchingEdge { .. } => ErrorKind::NoMatchingEdgeError,
            WorkflowError::Timeout { .. } => ErrorKind::TimeoutError,
            WorkflowError::MalformedGraph { .. } => ErrorKind::MalformedGraphError,
            WorkflowError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether a declared error handler may take over after this error.
    pub(crate) fn is_handleable(&self) -> bool {
        matches!(
            self,
            WorkflowError::NodeExecution { .. }
                | WorkflowError::SchemaViolation { .. }
                | WorkflowError::NoMatchingEdge { .. }
        )
    }
}

/// A failed run: the error plus whatever state had accumulated.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct WorkflowFailure {
    pub error: WorkflowError,
    pub partial_state: Box<WorkflowState>,
}

impl WorkflowFailure {
    pub fn new(error: WorkflowError, partial_state: WorkflowState) -> Self {
        Self {
            error,
            partial_state: Box::new(partial_state),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn to_failure(&self) -> Failure {
        Failure::new(self.kind(), self.error.to_string()).with_partial_state(self.partial_state.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_onto_taxonomy() {
        let cases = [
            (
                WorkflowError::NoMatchingEdge { node: "a".into() },
                ErrorKind::NoMatchingEdgeError,
            ),
            (
                WorkflowError::Timeout { reason: "x".into() },
                ErrorKind::TimeoutError,
            ),
            (
                WorkflowError::MalformedGraph { reason: "x".into() },
                ErrorKind::MalformedGraphError,
            ),
            (
                WorkflowError::SchemaViolation {
                    node: "a".into(),
                    reason: "x".into(),
                },
                ErrorKind::NodeExecutionError,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn failure_carries_partial_state() {
        let state = WorkflowState::new("wf", "some input");
        let failure = WorkflowFailure::new(
            WorkflowError::NodeExecution {
                node: "b".into(),
                reason: "boom".into(),
            },
            state,
        )
        .to_failure();
        assert_eq!(failure.kind, ErrorKind::NodeExecutionError);
        assert_eq!(failure.partial_state.unwrap()["input"], "some input");
    }
}
