//! Agent Core — classification and routing of natural-language requests.
//!
//! Submodules:
//! - `classifier`: Casual filter, keyword-group scoring, disambiguation
//! - `registry`: Agent execute contract and the ordered agent registry
//! - `router`: Agent selection with threshold/fallback, retrying execution
//! - `history`: Bounded ring buffers for routing decisions and statistics
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod classifier;
pub mod errors;
pub mod history;
pub mod registry;
pub mod router;
pub mod types;

// Re-exports for convenience
pub use classifier::{Candidate, ContextDisambiguator, Disambiguator, InputClassifier};
pub use errors::AgentError;
pub use history::{BoundedLog, RoutingHistory, RoutingStats};
pub use registry::{agent_fn, Agent, AgentRegistry, FnAgent, RegisteredAgent};
pub use router::AgentRouter;
pub use types::{
    AgentCapability, AgentDescriptor, AgentKind, AgentResult, ExecutionResult, Priority,
    RoutingDecision, RoutingResult, TaskClassification, TaskType,
};
