//! WorkflowEngine — executes a compiled graph over a fresh state.
//!
//! One run is a single sequential chain: boundary checks (cancel / pause,
//! step budget, wall clock), execute the node under its time budget, validate
//! and merge its patch, then pick the first outgoing edge whose condition
//! holds. Node failures and dead ends divert to the declared error handler
//! when there is one; timeouts and cancellation always end the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::WorkflowConfig;

use super::control::{Checkpoint, RunControl};
use super::errors::{WorkflowError, WorkflowFailure};
use super::graph::{CompiledWorkflow, END};
use super::state::{StatePatch, WorkflowState, RESERVED_KEYS};

// ─── Options & Results ──────────────────────────────────────────────────────

/// Progress callbacks, invoked synchronously from the run loop.
pub trait StepObserver: Send + Sync {
    fn on_step_start(&self, _node: &str, _step_index: usize) {}

    fn on_step_end(&self, _metric: &StepMetric, _state: &WorkflowState) {}
}

/// Per-run knobs. Defaults come from [`WorkflowConfig`].
#[derive(Clone)]
pub struct RunOptions {
    pub max_steps: usize,
    pub timeout: Duration,
    pub node_timeout: Option<Duration>,
    /// Seeded into the state before the first node (reserved keys are skipped).
    pub initial_values: Map<String, Value>,
    pub control: Option<RunControl>,
    pub observer: Option<Arc<dyn StepObserver>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default())
    }
}

impl RunOptions {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            timeout: config.timeout(),
            node_timeout: config.node_timeout(),
            initial_values: Map::new(),
            control: None,
            observer: None,
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.initial_values.insert(key.into(), value.into());
        self
    }

    pub fn with_values(mut self, values: Map<String, Value>) -> Self {
        self.initial_values.extend(values);
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }
}

/// Timing and confidence of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepMetric {
    pub node: String,
    /// ISO 8601.
    pub started_at: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// A finished run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub state: WorkflowState,
    pub steps: Vec<StepMetric>,
    pub elapsed_ms: u64,
}

// ─── WorkflowEngine ─────────────────────────────────────────────────────────

/// Stateless executor; holds only default budgets.
#[derive(Debug, Clone, Default)]
pub struct WorkflowEngine {
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Options pre-filled with this engine's budgets.
    pub fn options(&self) -> RunOptions {
        RunOptions::from_config(&self.config)
    }

    /// Execute `workflow` to completion, failure, timeout or cancellation.
    pub async fn run(
        &self,
        workflow: &CompiledWorkflow,
        input: impl Into<String>,
        options: RunOptions,
    ) -> Result<WorkflowRun, WorkflowFailure> {
        let RunOptions {
            max_steps,
            timeout,
            node_timeout,
            initial_values,
            control,
            observer,
        } = options;

        let started = Instant::now();
        let mut state = WorkflowState::new(workflow.name(), input);
        for (key, value) in initial_values {
            if !state.seed(key.clone(), value) {
                tracing::warn!(key = %key, "workflow: ignoring reserved initial value");
            }
        }

        let workflow_id = state.workflow_id().to_string();
        tracing::info!(workflow = %workflow.name(), workflow_id = %workflow_id, "workflow: run started");

        let mut steps: Vec<StepMetric> = Vec::new();
        let mut paused_total = Duration::ZERO;
        let mut current = workflow.entry().to_string();

        loop {
            // ── Boundary checks ──
            // Completion is a boundary too, so a paused run never finishes on its own.
            if let Some(control) = &control {
                match control.checkpoint().await {
                    Checkpoint::Proceed { paused_for } => paused_total += paused_for,
                    Checkpoint::Cancelled => {
                        tracing::info!(workflow_id = %workflow_id, node = %current, "workflow: cancelled");
                        return Err(WorkflowFailure::new(
                            WorkflowError::Cancelled { node: current },
                            state,
                        ));
                    }
                }
            }

            if current == END {
                break;
            }

            if steps.len() >= max_steps {
                return Err(timeout_failure(
                    format!("step budget of {max_steps} exhausted before '{current}'"),
                    state,
                    &workflow_id,
                ));
            }

            let active = started.elapsed().saturating_sub(paused_total);
            if active >= timeout {
                return Err(timeout_failure(
                    format!("run exceeded {}ms", timeout.as_millis()),
                    state,
                    &workflow_id,
                ));
            }

            let Some(node) = workflow.node(&current).cloned() else {
                return Err(WorkflowFailure::new(
                    WorkflowError::MalformedGraph {
                        reason: format!("node '{current}' missing at run time"),
                    },
                    state,
                ));
            };

            // ── Execute ──
            state.current_step = Some(current.clone());
            if let Some(observer) = &observer {
                observer.on_step_start(&current, steps.len());
            }

            let remaining = timeout - active;
            let (budget, node_bound) = match node_timeout {
                Some(t) if t < remaining => (t, true),
                _ => (remaining, false),
            };

            let step_started = Instant::now();
            let started_at = chrono::Utc::now().to_rfc3339();
            let outcome = tokio::time::timeout(budget, node.execute(&state)).await;
            let duration_ms = step_started.elapsed().as_millis() as u64;

            let step_result: Result<StatePatch, WorkflowError> = match outcome {
                Err(_) => {
                    let reason = if node_bound {
                        format!("node '{current}' exceeded {}ms", budget.as_millis())
                    } else {
                        format!("run exceeded {}ms during '{current}'", timeout.as_millis())
                    };
                    let metric = StepMetric {
                        node: current.clone(),
                        started_at,
                        duration_ms,
                        success: false,
                        confidence: None,
                    };
                    notify_end(&observer, &metric, &state);
                    return Err(timeout_failure(reason, state, &workflow_id));
                }
                Ok(Err(e)) => Err(WorkflowError::NodeExecution {
                    node: current.clone(),
                    reason: e.message,
                }),
                Ok(Ok(patch)) => validate_patch(workflow, &current, &patch).map(|()| patch),
            };

            match step_result {
                Ok(patch) => {
                    let confidence = patch.confidence();
                    state.apply(&current, patch);
                    let metric = StepMetric {
                        node: current.clone(),
                        started_at,
                        duration_ms,
                        success: true,
                        confidence,
                    };
                    tracing::debug!(node = %current, duration_ms, "workflow: step completed");
                    notify_end(&observer, &metric, &state);
                    steps.push(metric);

                    match next_node(workflow, &current, &state) {
                        Ok(next) => current = next,
                        Err(err) => match workflow.error_handler_for(&current) {
                            Some(handler) => {
                                tracing::warn!(node = %current, handler, "workflow: no matching edge, diverting to handler");
                                state.error = Some(err.to_string());
                                current = handler.to_string();
                            }
                            None => {
                                tracing::warn!(node = %current, "workflow: no matching edge");
                                return Err(WorkflowFailure::new(err, state));
                            }
                        },
                    }
                }
                Err(err) => {
                    let metric = StepMetric {
                        node: current.clone(),
                        started_at,
                        duration_ms,
                        success: false,
                        confidence: None,
                    };
                    state.error = Some(err.to_string());
                    notify_end(&observer, &metric, &state);
                    steps.push(metric);

                    match workflow.error_handler_for(&current) {
                        Some(handler) if err.is_handleable() => {
                            tracing::warn!(node = %current, handler, error = %err, "workflow: step failed, diverting to handler");
                            current = handler.to_string();
                        }
                        _ => {
                            tracing::warn!(node = %current, error = %err, "workflow: step failed");
                            return Err(WorkflowFailure::new(err, state));
                        }
                    }
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            workflow = %workflow.name(),
            workflow_id = %workflow_id,
            steps = steps.len(),
            elapsed_ms,
            "workflow: run completed"
        );

        Ok(WorkflowRun {
            state,
            steps,
            elapsed_ms,
        })
    }
}

// ─── Free Functions ─────────────────────────────────────────────────────────

/// First edge (in declaration order) whose condition holds; `END` when the
/// node has no outgoing edges.
fn next_node(
    workflow: &CompiledWorkflow,
    current: &str,
    state: &WorkflowState,
) -> Result<String, WorkflowError> {
    let edges = workflow.edges_from(current);
    if edges.is_empty() {
        return Ok(END.to_string());
    }
    edges
        .iter()
        .find(|e| e.condition.evaluate(state))
        .map(|e| e.to.clone())
        .ok_or_else(|| WorkflowError::NoMatchingEdge {
            node: current.to_string(),
        })
}

/// Reserved keys are never writable; declared outputs restrict the rest.
fn validate_patch(
    workflow: &CompiledWorkflow,
    node: &str,
    patch: &StatePatch,
) -> Result<(), WorkflowError> {
    let declared = workflow.declared_outputs(node);
    for key in patch.keys() {
        if RESERVED_KEYS.contains(&key) {
            return Err(WorkflowError::SchemaViolation {
                node: node.to_string(),
                reason: format!("'{key}' is reserved"),
            });
        }
        if let Some(allowed) = declared {
            if !allowed.contains(key) {
                return Err(WorkflowError::SchemaViolation {
                    node: node.to_string(),
                    reason: format!("'{key}' is not a declared output"),
                });
            }
        }
    }
    Ok(())
}

fn notify_end(observer: &Option<Arc<dyn StepObserver>>, metric: &StepMetric, state: &WorkflowState) {
    if let Some(observer) = observer {
        observer.on_step_end(metric, state);
    }
}

fn timeout_failure(reason: String, state: WorkflowState, workflow_id: &str) -> WorkflowFailure {
    tracing::warn!(workflow_id = %workflow_id, reason = %reason, "workflow: timed out");
    WorkflowFailure::new(WorkflowError::Timeout { reason }, state)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::failure::ErrorKind;
    use crate::workflow::errors::NodeError;
    use crate::workflow::graph::{node_fn, EdgeCondition, WorkflowBuilder, WorkflowNode};

    fn writes(pairs: &'static [(&'static str, i64)]) -> Arc<dyn WorkflowNode> {
        node_fn(move |_| async move {
            let mut patch = StatePatch::new();
            for (k, v) in pairs {
                patch.insert(*k, *v);
            }
            Ok(patch)
        })
    }

    fn failing(msg: &'static str) -> Arc<dyn WorkflowNode> {
        node_fn(move |_| async move { Err(NodeError::new(msg)) })
    }

    fn engine() -> WorkflowEngine {
        WorkflowEngine::default()
    }

    #[tokio::test]
    async fn linear_run_records_order_and_merges() {
        let wf = WorkflowBuilder::new("linear")
            .add_node("A", writes(&[("x", 1), ("y", 1)]))
            .add_node("B", writes(&[("y", 2)]))
            .add_node("C", writes(&[("z", 3)]))
            .add_edge("A", "B")
            .add_edge("B", "C")
            .add_edge("C", END)
            .set_entry("A")
            .compile()
            .unwrap();

        let run = engine().run(&wf, "go", RunOptions::default()).await.unwrap();
        assert_eq!(run.state.steps_completed(), &["A", "B", "C"]);
        assert_eq!(run.state.get("x"), Some(&json!(1)));
        assert_eq!(run.state.get("y"), Some(&json!(2)));
        assert_eq!(run.state.get("z"), Some(&json!(3)));
        assert_eq!(run.steps.len(), 3);
        assert!(run.steps.iter().all(|s| s.success));
        assert!(run.state.error.is_none());
    }

    #[tokio::test]
    async fn cycle_fails_with_timeout_within_max_steps() {
        let wf = WorkflowBuilder::new("loop")
            .add_node("A", writes(&[]))
            .add_node("B", writes(&[]))
            .add_edge("A", "B")
            .add_edge("B", "A")
            .set_entry("A")
            .compile()
            .unwrap();

        let failure = engine()
            .run(&wf, "", RunOptions::default().with_max_steps(7))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::TimeoutError);
        assert_eq!(failure.partial_state.steps_completed().len(), 7);
    }

    #[tokio::test]
    async fn self_loop_is_recorded_once_but_counted_per_run() {
        let poll = node_fn(|s: WorkflowState| async move {
            let n = s.get("polls").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(StatePatch::new().set("polls", n + 1))
        });
        let wf = WorkflowBuilder::new("poll")
            .add_node("poll", poll)
            .add_node("done", writes(&[]))
            .add_conditional_edge("poll", "done", EdgeCondition::key_equals("polls", 3))
            .add_conditional_edge("poll", "poll", EdgeCondition::Always)
            .add_edge("done", END)
            .set_entry("poll")
            .compile()
            .unwrap();

        let run = engine().run(&wf, "", RunOptions::default()).await.unwrap();
        assert_eq!(run.state.steps_completed(), &["poll", "done"]);
        assert_eq!(run.steps.len(), 4);
        assert_eq!(run.state.get("polls"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn first_declared_edge_wins_when_both_match() {
        let wf = WorkflowBuilder::new("branch")
            .add_node("start", writes(&[("flag", 1)]))
            .add_node("left", writes(&[("went", 0)]))
            .add_node("right", writes(&[("went", 1)]))
            .add_conditional_edge("start", "left", EdgeCondition::KeyExists("flag".into()))
            .add_conditional_edge("start", "right", EdgeCondition::Always)
            .set_entry("start")
            .compile()
            .unwrap();

        for _ in 0..5 {
            let run = engine().run(&wf, "", RunOptions::default()).await.unwrap();
            assert_eq!(run.state.steps_completed(), &["start", "left"]);
        }
    }

    #[tokio::test]
    async fn exclusive_predicates_take_exactly_one_edge() {
        let wf = WorkflowBuilder::new("branch")
            .add_node("start", node_fn(|s: WorkflowState| async move {
                Ok(StatePatch::new().set("route", s.input.clone()))
            }))
            .add_node("left", writes(&[]))
            .add_node("right", writes(&[]))
            .add_conditional_edge("start", "left", EdgeCondition::key_equals("route", "left"))
            .add_conditional_edge(
                "start",
                "right",
                EdgeCondition::Not(Box::new(EdgeCondition::key_equals("route", "left"))),
            )
            .set_entry("start")
            .compile()
            .unwrap();

        let run = engine().run(&wf, "left", RunOptions::default()).await.unwrap();
        assert_eq!(run.state.steps_completed(), &["start", "left"]);
        let run = engine().run(&wf, "other", RunOptions::default()).await.unwrap();
        assert_eq!(run.state.steps_completed(), &["start", "right"]);
    }

    #[tokio::test]
    async fn no_matching_edge_fails_without_handler() {
        let wf = WorkflowBuilder::new("dead_end")
            .add_node("start", writes(&[("a", 1)]))
            .add_node("never", writes(&[]))
            .add_conditional_edge("start", "never", EdgeCondition::KeyExists("missing".into()))
            .set_entry("start")
            .compile()
            .unwrap();

        let failure = engine().run(&wf, "", RunOptions::default()).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::NoMatchingEdgeError);
        assert_eq!(failure.partial_state.get("a"), Some(&json!(1)));
        let structured = failure.to_failure();
        assert_eq!(structured.partial_state.unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn no_matching_edge_diverts_to_handler() {
        let wf = WorkflowBuilder::new("dead_end")
            .add_node("start", writes(&[]))
            .add_node("never", writes(&[]))
            .add_node("recover", node_fn(|_| async {
                Ok(StatePatch::new().set("message", "could not continue"))
            }))
            .add_conditional_edge("start", "never", EdgeCondition::KeyExists("missing".into()))
            .set_entry("start")
            .set_error_handler("recover")
            .compile()
            .unwrap();

        let run = engine().run(&wf, "", RunOptions::default()).await.unwrap();
        assert_eq!(run.state.steps_completed(), &["start", "recover"]);
        assert!(run.state.error.as_deref().unwrap().contains("no matching edge"));
        assert_eq!(run.state.get_str("message"), Some("could not continue"));
    }

    #[tokio::test]
    async fn node_failure_goes_to_handler_and_keeps_error() {
        let wf = WorkflowBuilder::new("handled")
            .add_node("A", writes(&[("a", 1)]))
            .add_node("B", failing("disk on fire"))
            .add_node("C", writes(&[]))
            .add_node("report", node_fn(|s: WorkflowState| async move {
                let msg = format!("Sorry: {}", s.error.clone().unwrap_or_default());
                Ok(StatePatch::new().set("message", msg))
            }))
            .add_edge("A", "B")
            .add_edge("B", "C")
            .set_entry("A")
            .set_error_handler("report")
            .compile()
            .unwrap();

        let run = engine().run(&wf, "", RunOptions::default()).await.unwrap();
        assert_eq!(run.state.steps_completed(), &["A", "report"]);
        assert!(run.state.get_str("message").unwrap().contains("disk on fire"));
        assert!(run.state.error.is_some());
        assert!(!run.steps[1].success);
    }

    #[tokio::test]
    async fn per_node_handler_overrides_graph_handler() {
        let wf = WorkflowBuilder::new("handled")
            .add_node("A", failing("boom"))
            .add_node("global", writes(&[("by", 0)]))
            .add_node("local", writes(&[("by", 1)]))
            .set_entry("A")
            .set_error_handler("global")
            .on_error("A", "local")
            .compile()
            .unwrap();

        let run = engine().run(&wf, "", RunOptions::default()).await.unwrap();
        assert_eq!(run.state.get("by"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn failing_handler_propagates() {
        let wf = WorkflowBuilder::new("handled")
            .add_node("A", failing("first"))
            .add_node("report", failing("second"))
            .set_entry("A")
            .set_error_handler("report")
            .compile()
            .unwrap();

        let failure = engine().run(&wf, "", RunOptions::default()).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::NodeExecutionError);
        assert!(failure.to_string().contains("second"));
    }

    #[tokio::test]
    async fn node_failure_without_handler_returns_partial_state() {
        let wf = WorkflowBuilder::new("unhandled")
            .add_node("A", writes(&[("a", 1)]))
            .add_node("B", failing("nope"))
            .add_edge("A", "B")
            .set_entry("A")
            .compile()
            .unwrap();

        let failure = engine().run(&wf, "in", RunOptions::default()).await.unwrap_err();
        assert!(matches!(failure.error, WorkflowError::NodeExecution { ref node, .. } if node == "B"));
        assert_eq!(failure.partial_state.steps_completed(), &["A"]);
        assert_eq!(failure.partial_state.error.as_deref(), Some("node 'B' failed: nope"));
    }

    #[tokio::test]
    async fn undeclared_output_is_a_schema_violation() {
        let wf = WorkflowBuilder::new("schema")
            .add_node_with_outputs("A", writes(&[("a", 1), ("b", 2)]), ["a"])
            .set_entry("A")
            .compile()
            .unwrap();

        let failure = engine().run(&wf, "", RunOptions::default()).await.unwrap_err();
        assert!(matches!(failure.error, WorkflowError::SchemaViolation { .. }));
        assert!(failure.partial_state.get("a").is_none());
    }

    #[tokio::test]
    async fn reserved_key_is_a_schema_violation() {
        let wf = WorkflowBuilder::new("schema")
            .add_node("A", node_fn(|_| async { Ok(StatePatch::new().set("metadata", 1)) }))
            .set_entry("A")
            .compile()
            .unwrap();

        let failure = engine().run(&wf, "", RunOptions::default()).await.unwrap_err();
        assert!(failure.to_string().contains("reserved"));
    }

    #[tokio::test]
    async fn slow_node_hits_node_timeout() {
        let wf = WorkflowBuilder::new("slow")
            .add_node("A", node_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(StatePatch::new())
            }))
            .add_node("report", writes(&[]))
            .set_entry("A")
            .set_error_handler("report")
            .compile()
            .unwrap();

        let options = RunOptions::default().with_node_timeout(Duration::from_millis(20));
        let failure = engine().run(&wf, "", options).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::TimeoutError);
        assert!(failure.to_string().contains("node 'A'"));
    }

    #[tokio::test]
    async fn run_timeout_bounds_whole_run() {
        let slow = || {
            node_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(StatePatch::new())
            })
        };
        let wf = WorkflowBuilder::new("slow")
            .add_node("A", slow())
            .add_node("B", slow())
            .add_node("C", slow())
            .add_edge("A", "B")
            .add_edge("B", "C")
            .set_entry("A")
            .compile()
            .unwrap();

        let options = RunOptions::default().with_timeout(Duration::from_millis(45));
        let failure = engine().run(&wf, "", options).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::TimeoutError);
        assert!(!failure.partial_state.steps_completed().is_empty());
    }

    #[tokio::test]
    async fn confidence_scores_are_recorded() {
        let wf = WorkflowBuilder::new("conf")
            .add_node("A", node_fn(|_| async { Ok(StatePatch::new().with_confidence(1.5)) }))
            .add_node("B", node_fn(|_| async { Ok(StatePatch::new().with_confidence(0.25)) }))
            .add_conditional_edge("A", "B", EdgeCondition::ConfidenceAtLeast { node: "A".into(), min: 0.9 })
            .set_entry("A")
            .compile()
            .unwrap();

        let run = engine().run(&wf, "", RunOptions::default()).await.unwrap();
        assert_eq!(run.state.confidence("A"), Some(1.0));
        assert_eq!(run.state.confidence("B"), Some(0.25));
        assert_eq!(run.steps[1].confidence, Some(0.25));
    }

    #[tokio::test]
    async fn initial_values_are_seeded() {
        let wf = WorkflowBuilder::new("seed")
            .add_node("A", node_fn(|s: WorkflowState| async move {
                let text = s.text_or_input("document_content").to_uppercase();
                Ok(StatePatch::new().set("upper", text))
            }))
            .set_entry("A")
            .compile()
            .unwrap();

        let options = RunOptions::default()
            .with_value("document_content", "abc")
            .with_value("input", "ignored");
        let run = engine().run(&wf, "fallback", options).await.unwrap();
        assert_eq!(run.state.get_str("upper"), Some("ABC"));
        assert_eq!(run.state.input, "fallback");
    }

    #[tokio::test]
    async fn subgraph_runs_inline_and_can_be_reused() {
        let pair = WorkflowBuilder::new("pair")
            .add_node("chunk", writes(&[("chunked", 1)]))
            .add_node("aggregate", writes(&[("aggregated", 1)]))
            .add_edge("chunk", "aggregate")
            .add_edge("aggregate", END)
            .set_entry("chunk")
            .compile()
            .unwrap();

        let wf = WorkflowBuilder::new("main")
            .add_node("start", writes(&[]))
            .add_subgraph("first", &pair)
            .add_subgraph("second", &pair)
            .add_edge("start", "first")
            .add_edge("first", "second")
            .set_entry("start")
            .compile()
            .unwrap();

        let run = engine().run(&wf, "", RunOptions::default()).await.unwrap();
        assert_eq!(
            run.state.steps_completed(),
            &["start", "first/chunk", "first/aggregate", "second/chunk", "second/aggregate"]
        );
    }

    #[tokio::test]
    async fn cancel_takes_effect_at_next_boundary() {
        let control = RunControl::new();
        let handle = control.clone();
        let wf = WorkflowBuilder::new("cancel")
            .add_node("A", node_fn(move |_| {
                let handle = handle.clone();
                async move {
                    handle.cancel();
                    Ok(StatePatch::new().set("a", 1))
                }
            }))
            .add_node("B", writes(&[("b", 1)]))
            .add_edge("A", "B")
            .set_entry("A")
            .compile()
            .unwrap();

        let failure = engine()
            .run(&wf, "", RunOptions::default().with_control(control))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Cancelled);
        // A finished before the signal was honoured; B never started.
        assert_eq!(failure.partial_state.steps_completed(), &["A"]);
    }

    #[derive(Default)]
    struct Recorder {
        started: AtomicUsize,
        ended: Mutex<Vec<String>>,
    }

    impl StepObserver for Recorder {
        fn on_step_start(&self, _node: &str, _step_index: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_step_end(&self, metric: &StepMetric, _state: &WorkflowState) {
            self.ended.lock().unwrap().push(metric.node.clone());
        }
    }

    #[tokio::test]
    async fn paused_run_waits_and_excludes_paused_time() {
        let wf = WorkflowBuilder::new("pause")
            .add_node("A", writes(&[]))
            .add_node("B", writes(&[]))
            .add_edge("A", "B")
            .set_entry("A")
            .compile()
            .unwrap();

        let control = RunControl::new();
        control.pause();
        let recorder = Arc::new(Recorder::default());
        let options = RunOptions::default()
            .with_control(control.clone())
            .with_observer(recorder.clone())
            .with_timeout(Duration::from_millis(60));

        let task = tokio::spawn(async move { engine().run(&wf, "", options).await });
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(recorder.started.load(Ordering::SeqCst), 0);
        assert!(!task.is_finished());

        control.resume();
        let run = task.await.unwrap().unwrap();
        assert_eq!(run.state.steps_completed(), &["A", "B"]);
        assert_eq!(*recorder.ended.lock().unwrap(), vec!["A".to_string(), "B".to_string()]);
    }
}
