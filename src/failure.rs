//! Structured failure object returned across the public boundary.
//!
//! Every subsystem error maps onto a closed [`ErrorKind`] tag. Callers that
//! need to serialize an outcome (JSON results, execution records, the SQLite
//! store) carry a [`Failure`] rather than the error value itself.

use serde::{Deserialize, Serialize};

/// Closed taxonomy of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input was empty or could not be classified.
    ClassificationError,
    /// Confidence below threshold with no fallback configured.
    RoutingError,
    /// A workflow step or an agent execution failed.
    NodeExecutionError,
    /// Conditional dispatch found no valid transition.
    NoMatchingEdgeError,
    /// A step, workflow or call budget was exceeded.
    TimeoutError,
    /// An external capability is not initialized or not reachable.
    CapabilityUnavailableError,
    /// The workflow graph failed validation.
    MalformedGraphError,
    /// The run was cancelled at a node boundary.
    Cancelled,
    /// Anything else (storage, serialization, invalid state transitions).
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ClassificationError => "classification_error",
            ErrorKind::RoutingError => "routing_error",
            ErrorKind::NodeExecutionError => "node_execution_error",
            ErrorKind::NoMatchingEdgeError => "no_matching_edge_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::CapabilityUnavailableError => "capability_unavailable_error",
            ErrorKind::MalformedGraphError => "malformed_graph_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ kind, message, partial_state }`, never a raw backtrace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_state: Option<serde_json::Value>,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            partial_state: None,
        }
    }

    pub fn with_partial_state(mut self, state: serde_json::Value) -> Self {
        self.partial_state = Some(state);
        self
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
