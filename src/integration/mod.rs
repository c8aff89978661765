//! Integration — capabilities, execution tracking and the manager that ties
//! the router and the workflow engine together.
//!
//! Submodules:
//! - `capability`: Capability contract, request/response types, the timed capability set
//! - `builtin`: Offline lexical capabilities (analysis, search, QA, outline)
//! - `workflows`: Built-in document analysis, question answering and chunked summary graphs
//! - `execution`: Execution records with status machine, progress and logs
//! - `store`: SQLite persistence for executions and routing decisions
//! - `manager`: IntegrationManager and its builder
//! - `errors`: Integration-level error types

pub mod builtin;
pub mod capability;
pub mod errors;
pub mod execution;
pub mod manager;
pub mod store;
pub mod workflows;

// Re-exports for convenience
pub use builtin::{ExtractiveQa, InMemorySearchIndex, LexicalAnalyzer, OutlineExtractor};
pub use capability::{
    Answer, Capability, CapabilityKind, CapabilityRequest, CapabilityResponse, CapabilitySet,
    DocumentAnalysis, DocumentStructure, Entity, SearchHit, Section, Sentiment,
};
pub use errors::IntegrationError;
pub use execution::{ExecutionRecord, ExecutionStatus, LogEntry, LogLevel};
pub use manager::{
    IntegratedRequest, IntegratedResult, IntegrationManager, IntegrationManagerBuilder,
    ProcessResult, ProcessRoute, WorkflowOutcome,
};
pub use store::ExecutionStore;
