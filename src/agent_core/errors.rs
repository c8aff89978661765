//! Agent Core error types.

use thiserror::Error;

use crate::failure::{ErrorKind, Failure};

use super::types::AgentKind;

/// Errors that can occur during classification, registration and routing.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Input was empty or could not be assigned a task type.
    #[error("classification failed: {reason}")]
    Classification { reason: String },

    /// No agent could be selected (confidence below threshold, fallback disabled).
    #[error("routing failed: {reason}")]
    Routing { reason: String },

    /// The selected agent returned an error.
    #[error("agent '{agent}' failed: {reason}")]
    AgentExecution {
        agent: AgentKind,
        reason: String,
        /// Transient failures are retried by the router.
        retriable: bool,
    },

    /// Agent execution exceeded the router budget.
    #[error("agent '{agent}' timed out after {timeout_ms}ms")]
    Timeout { agent: AgentKind, timeout_ms: u64 },

    /// Two agents were registered under the same key.
    #[error("agent '{kind}' is already registered")]
    DuplicateAgent { kind: AgentKind },

    /// The routing target is not in the registry.
    #[error("agent '{kind}' is not registered")]
    UnknownAgent { kind: AgentKind },
}

impl AgentError {
    /// Transient error raised by an agent; the router retries it.
    pub fn transient(agent: AgentKind, reason: impl Into<String>) -> Self {
        AgentError::AgentExecution {
            agent,
            reason: reason.into(),
            retriable: true,
        }
    }

    /// Permanent error raised by an agent; never retried.
    pub fn permanent(agent: AgentKind, reason: impl Into<String>) -> Self {
        AgentError::AgentExecution {
            agent,
            reason: reason.into(),
            retriable: false,
        }
    }

    /// Whether the router may retry after this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AgentError::AgentExecution { retriable: true, .. } | AgentError::Timeout { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Classification { .. } => ErrorKind::ClassificationError,
            AgentError::Routing { .. } | AgentError::UnknownAgent { .. } => ErrorKind::RoutingError,
            AgentError::AgentExecution { .. } => ErrorKind::NodeExecutionError,
            AgentError::Timeout { .. } => ErrorKind::TimeoutError,
            AgentError::DuplicateAgent { .. } => ErrorKind::InternalError,
        }
    }

    pub fn to_failure(&self) -> Failure {
        Failure::new(self.kind(), self.to_string())
    }
}
