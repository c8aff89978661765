//! Workflow Graph Engine — directed graphs of async steps over shared state.
//!
//! Submodules:
//! - `state`: `WorkflowState` and the `StatePatch` nodes return
//! - `graph`: Nodes, edge conditions, `WorkflowBuilder`, `CompiledWorkflow`
//! - `engine`: The run loop with step/time budgets and error handlers
//! - `control`: Cooperative pause / resume / cancel at node boundaries
//! - `errors`: Workflow error types and the `WorkflowFailure` carrier

pub mod control;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod state;

// Re-exports for convenience
pub use control::{ControlSignal, RunControl};
pub use engine::{RunOptions, StepMetric, StepObserver, WorkflowEngine, WorkflowRun};
pub use errors::{NodeError, WorkflowError, WorkflowFailure};
pub use graph::{
    node_fn, CompiledWorkflow, Edge, EdgeCondition, EdgePredicate, FnNode, WorkflowBuilder,
    WorkflowNode, END,
};
pub use state::{StateMetadata, StatePatch, WorkflowState, RESERVED_KEYS};
