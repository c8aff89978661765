//! IntegrationManager — composes the router, the workflow engine and the
//! capability set, and tracks every run as an [`ExecutionRecord`].
//!
//! Entry points:
//! - `execute`: one capability call
//! - `execute_integrated`: concurrent fan-out with partial-failure tolerance
//! - `run_workflow`: one tracked workflow run (pausable, cancellable)
//! - `process`: classify, then answer directly, run the bound workflow or route to an agent

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent_core::router::canned_reply;
use crate::agent_core::{
    AgentRouter, BoundedLog, ExecutionResult, InputClassifier, RoutingDecision,
    TaskClassification, TaskType,
};
use crate::config::AgentflowConfig;
use crate::failure::{ErrorKind, Failure};
use crate::workflow::{
    CompiledWorkflow, RunControl, StepMetric, StepObserver, WorkflowEngine, WorkflowState,
};

use super::builtin::{ExtractiveQa, InMemorySearchIndex, LexicalAnalyzer, OutlineExtractor};
use super::capability::{
    Answer, Capability, CapabilityKind, CapabilityRequest, CapabilityResponse, CapabilitySet,
    DocumentAnalysis, DocumentStructure, SearchHit,
};
use super::errors::IntegrationError;
use super::execution::{ExecutionRecord, ExecutionStatus, LogEntry};
use super::store::ExecutionStore;
use super::workflows::{self, OUTPUT_KEY};

/// Hits fed to question answering in research fan-outs.
const RESEARCH_HITS: usize = 5;

// ─── Requests & Results ─────────────────────────────────────────────────────

/// Composite operations over several capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratedRequest {
    /// Document analysis and structure extraction, concurrently.
    DocumentInsights,
    /// Search, then answer the text as a question over the hits.
    Research,
    /// Both of the above, all branches concurrently.
    FullAnalysis,
}

impl IntegratedRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegratedRequest::DocumentInsights => "document_insights",
            IntegratedRequest::Research => "research",
            IntegratedRequest::FullAnalysis => "full_analysis",
        }
    }

    pub fn capabilities(&self) -> &'static [CapabilityKind] {
        match self {
            IntegratedRequest::DocumentInsights => &[
                CapabilityKind::DocumentAnalysis,
                CapabilityKind::StructureExtraction,
            ],
            IntegratedRequest::Research => {
                &[CapabilityKind::Search, CapabilityKind::QuestionAnswering]
            }
            IntegratedRequest::FullAnalysis => &CapabilityKind::ALL,
        }
    }
}

/// Outcome of a composite operation. Results and failures are keyed by capability name.
#[derive(Debug, Clone, Serialize)]
pub struct IntegratedResult {
    pub execution_id: String,
    pub request: IntegratedRequest,
    /// True when at least one capability produced a result.
    pub success: bool,
    pub results: BTreeMap<String, Value>,
    pub failures: BTreeMap<String, Failure>,
    pub elapsed_ms: u64,
}

/// Outcome of a tracked workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub execution_id: String,
    pub workflow: String,
    /// The run's `output` value, or all step outputs when it has none.
    pub output: Value,
    pub state: WorkflowState,
    pub steps: Vec<StepMetric>,
    pub elapsed_ms: u64,
}

/// How `process` handled an input.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessRoute {
    /// Casual input answered with a canned reply.
    Direct,
    Workflow {
        name: String,
        execution_id: Option<String>,
    },
    Agent {
        decision: Option<RoutingDecision>,
        #[serde(rename = "executionResult")]
        execution_result: Option<ExecutionResult>,
    },
}

/// JSON-serializable result of [`IntegrationManager::process`].
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub input: String,
    pub classification: TaskClassification,
    pub route: ProcessRoute,
    pub output: Value,
    /// Per-step timing and confidence (workflow routes only).
    pub steps: Vec<StepMetric>,
    /// Ordered execution log (workflow routes only).
    pub logs: Vec<LogEntry>,
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

// ─── Execution Tracking ─────────────────────────────────────────────────────

/// Live records, run controls and a bounded history of finished records.
struct ExecutionTracker {
    active: Mutex<HashMap<String, ExecutionRecord>>,
    controls: Mutex<HashMap<String, RunControl>>,
    finished: BoundedLog<ExecutionRecord>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl ExecutionTracker {
    fn new(capacity: usize) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            controls: Mutex::new(HashMap::new()),
            finished: BoundedLog::new(capacity),
        }
    }

    fn start(&self, record: ExecutionRecord, control: Option<RunControl>) {
        if let Some(control) = control {
            lock(&self.controls).insert(record.id.clone(), control);
        }
        lock(&self.active).insert(record.id.clone(), record);
    }

    fn update<R>(&self, id: &str, f: impl FnOnce(&mut ExecutionRecord) -> R) -> Option<R> {
        lock(&self.active).get_mut(id).map(f)
    }

    fn control(&self, id: &str) -> Option<RunControl> {
        lock(&self.controls).get(id).cloned()
    }

    /// Settle the record with `f` and move it to the finished history.
    fn finish(
        &self,
        id: &str,
        f: impl FnOnce(&mut ExecutionRecord) -> Result<(), IntegrationError>,
    ) -> Option<ExecutionRecord> {
        lock(&self.controls).remove(id);
        let mut record = lock(&self.active).remove(id)?;
        // A pause that arrived after the last node boundary never took effect.
        if record.status == ExecutionStatus::Paused {
            let _ = record.resume();
        }
        if let Err(e) = f(&mut record) {
            tracing::warn!(execution_id = %id, error = %e, "integration: could not settle execution");
        }
        self.finished.push(record.clone());
        Some(record)
    }

    fn get(&self, id: &str) -> Option<ExecutionRecord> {
        if let Some(record) = lock(&self.active).get(id) {
            return Some(record.clone());
        }
        self.finished.snapshot().into_iter().rev().find(|r| r.id == id)
    }

    fn active(&self) -> Vec<ExecutionRecord> {
        let mut records: Vec<_> = lock(&self.active).values().cloned().collect();
        records.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        records
    }
}

/// Mirrors engine step events into the execution record.
struct ExecutionObserver {
    tracker: Arc<ExecutionTracker>,
    execution_id: String,
    node_count: usize,
    finished_steps: AtomicUsize,
}

impl StepObserver for ExecutionObserver {
    fn on_step_start(&self, node: &str, _step_index: usize) {
        self.tracker
            .update(&self.execution_id, |r| r.step_started(node));
    }

    fn on_step_end(&self, metric: &StepMetric, state: &WorkflowState) {
        let done = self.finished_steps.fetch_add(1, Ordering::SeqCst) + 1;
        // Cycles can run more steps than there are nodes; 100 is reserved for completion.
        let progress = (done as f32 / self.node_count.max(1) as f32 * 100.0).min(99.0);
        self.tracker.update(&self.execution_id, |r| {
            let message = if metric.success {
                format!("{} completed in {}ms", metric.node, metric.duration_ms)
            } else {
                state
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", metric.node))
            };
            r.step_finished(&metric.node, metric.success, message);
            r.set_progress(progress);
        });
    }
}

// ─── Builder ────────────────────────────────────────────────────────────────

pub struct IntegrationManagerBuilder {
    config: AgentflowConfig,
    capabilities: Vec<Arc<dyn Capability>>,
    router: Option<AgentRouter>,
    workflows: Vec<CompiledWorkflow>,
    builtin_workflows: bool,
    bindings: Vec<(TaskType, String)>,
    store: Option<ExecutionStore>,
}

impl IntegrationManagerBuilder {
    pub fn new(config: AgentflowConfig) -> Self {
        Self {
            config,
            capabilities: Vec::new(),
            router: None,
            workflows: Vec::new(),
            builtin_workflows: false,
            bindings: Vec::new(),
            store: None,
        }
    }

    /// Register a capability; replaces an earlier one of the same kind.
    pub fn capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Register the offline capabilities (empty search index).
    pub fn with_builtin_capabilities(self) -> Self {
        self.capability(Arc::new(LexicalAnalyzer::new()))
            .capability(Arc::new(InMemorySearchIndex::new()))
            .capability(Arc::new(ExtractiveQa::new()))
            .capability(Arc::new(OutlineExtractor::new()))
    }

    pub fn router(mut self, router: AgentRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn workflow(mut self, workflow: CompiledWorkflow) -> Self {
        self.workflows.push(workflow);
        self
    }

    /// Register the built-in workflows and bind `document_analysis` inputs to them.
    pub fn with_builtin_workflows(mut self) -> Self {
        self.builtin_workflows = true;
        self
    }

    /// Send inputs classified as `task_type` to the named workflow.
    pub fn bind_task(mut self, task_type: TaskType, workflow: impl Into<String>) -> Self {
        self.bindings.push((task_type, workflow.into()));
        self
    }

    pub fn store(mut self, store: ExecutionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<IntegrationManager, IntegrationError> {
        let capabilities = CapabilitySet::new(
            self.capabilities,
            self.config.integration.capability_timeout(),
        );

        let mut workflows = HashMap::new();
        let mut task_workflows = HashMap::new();
        if self.builtin_workflows {
            for wf in workflows::builtin_workflows(&capabilities)? {
                workflows.insert(wf.name().to_string(), wf);
            }
            task_workflows.insert(TaskType::DocumentAnalysis, workflows::DOCUMENT_ANALYSIS.to_string());
        }
        for wf in self.workflows {
            workflows.insert(wf.name().to_string(), wf);
        }
        for (task_type, name) in self.bindings {
            if !workflows.contains_key(&name) {
                return Err(IntegrationError::UnknownWorkflow { name });
            }
            task_workflows.insert(task_type, name);
        }

        Ok(IntegrationManager {
            classifier: InputClassifier::new(self.config.classifier.clone()),
            engine: WorkflowEngine::new(self.config.workflow.clone()),
            tracker: Arc::new(ExecutionTracker::new(
                self.config.integration.execution_history_capacity,
            )),
            router: self.router,
            store: self.store.map(Mutex::new),
            capabilities,
            workflows,
            task_workflows,
        })
    }
}

// ─── IntegrationManager ─────────────────────────────────────────────────────

pub struct IntegrationManager {
    capabilities: CapabilitySet,
    router: Option<AgentRouter>,
    classifier: InputClassifier,
    engine: WorkflowEngine,
    workflows: HashMap<String, CompiledWorkflow>,
    task_workflows: HashMap<TaskType, String>,
    tracker: Arc<ExecutionTracker>,
    store: Option<Mutex<ExecutionStore>>,
}

impl IntegrationManager {
    pub fn builder(config: AgentflowConfig) -> IntegrationManagerBuilder {
        IntegrationManagerBuilder::new(config)
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn router(&self) -> Option<&AgentRouter> {
        self.router.as_ref()
    }

    pub fn workflow(&self, name: &str) -> Option<&CompiledWorkflow> {
        self.workflows.get(name)
    }

    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workflows.keys().cloned().collect();
        names.sort();
        names
    }

    /// Workflow bound to `task_type`, if any.
    pub fn bound_workflow(&self, task_type: TaskType) -> Option<&str> {
        self.task_workflows.get(&task_type).map(String::as_str)
    }

    /// Initialize every capability. Failures are returned, never fatal.
    pub async fn initialize_all(&self) -> Vec<(CapabilityKind, IntegrationError)> {
        self.capabilities.initialize_all().await
    }

    // ─── Capabilities ───────────────────────────────────────────────────

    pub async fn execute(
        &self,
        kind: CapabilityKind,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, IntegrationError> {
        self.capabilities.execute(kind, request).await
    }

    pub async fn analyze_document(
        &self,
        text: &str,
        metadata: Option<Value>,
    ) -> Result<DocumentAnalysis, IntegrationError> {
        self.capabilities.analyze_document(text, metadata).await
    }

    pub async fn search(
        &self,
        query: &str,
        filters: Option<Value>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, IntegrationError> {
        self.capabilities.search(query, filters, limit).await
    }

    pub async fn answer_question(
        &self,
        question: &str,
        context: Option<String>,
    ) -> Result<Answer, IntegrationError> {
        self.capabilities.answer_question(question, context).await
    }

    pub async fn extract_structure(&self, text: &str) -> Result<DocumentStructure, IntegrationError> {
        self.capabilities.extract_structure(text).await
    }

    /// Fan out to the request's capabilities concurrently.
    ///
    /// A failing capability is recorded under `failures` and left out of
    /// `results`; the call itself never fails.
    pub async fn execute_integrated(&self, request: IntegratedRequest, text: &str) -> IntegratedResult {
        let started = Instant::now();
        let mut record = ExecutionRecord::new(format!("integrated:{}", request.as_str()));
        let execution_id = record.id.clone();
        for kind in request.capabilities() {
            record.step_started(kind.as_str());
        }
        self.tracker.start(record, None);
        tracing::info!(request = request.as_str(), execution_id = %execution_id, "integration: composite operation started");

        let caps = &self.capabilities;
        let mut branches: Vec<BoxFuture<'_, Vec<(CapabilityKind, Result<Value, IntegrationError>)>>> =
            Vec::new();
        if matches!(request, IntegratedRequest::DocumentInsights | IntegratedRequest::FullAnalysis) {
            branches.push(
                async move {
                    vec![(
                        CapabilityKind::DocumentAnalysis,
                        to_json(caps.analyze_document(text, None).await),
                    )]
                }
                .boxed(),
            );
            branches.push(
                async move {
                    vec![(
                        CapabilityKind::StructureExtraction,
                        to_json(caps.extract_structure(text).await),
                    )]
                }
                .boxed(),
            );
        }
        if matches!(request, IntegratedRequest::Research | IntegratedRequest::FullAnalysis) {
            branches.push(research(caps, text).boxed());
        }

        let outcomes: Vec<_> = join_all(branches).await.into_iter().flatten().collect();

        let mut results = BTreeMap::new();
        let mut failures = BTreeMap::new();
        self.tracker.update(&execution_id, |r| {
            for (kind, outcome) in &outcomes {
                match outcome {
                    Ok(_) => r.step_finished(kind.as_str(), true, "completed"),
                    Err(e) => r.step_finished(kind.as_str(), false, e.to_string()),
                }
            }
        });
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(value) => {
                    results.insert(kind.to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(capability = %kind, error = %e, "integration: capability excluded from aggregate");
                    failures.insert(kind.to_string(), e.to_failure());
                }
            }
        }

        let success = !results.is_empty();
        let aggregate = Value::Object(results.clone().into_iter().collect());
        let first_failure = failures.values().next().cloned();
        let record = self.tracker.finish(&execution_id, |r| {
            if success {
                r.complete(aggregate)
            } else {
                r.fail(first_failure.unwrap_or_else(|| {
                    Failure::new(ErrorKind::CapabilityUnavailableError, "no capability produced a result")
                }))
            }
        });
        self.persist(record.as_ref());

        tracing::info!(
            request = request.as_str(),
            succeeded = results.len(),
            failed = failures.len(),
            "integration: composite operation finished"
        );

        IntegratedResult {
            execution_id,
            request,
            success,
            results,
            failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    // ─── Workflows ──────────────────────────────────────────────────────

    /// Run a registered workflow as a tracked, pausable execution.
    pub async fn run_workflow(
        &self,
        name: &str,
        input: &str,
        values: Map<String, Value>,
    ) -> Result<WorkflowOutcome, IntegrationError> {
        let workflow = self
            .workflows
            .get(name)
            .cloned()
            .ok_or_else(|| IntegrationError::UnknownWorkflow {
                name: name.to_string(),
            })?;

        let record = ExecutionRecord::new(name);
        let execution_id = record.id.clone();
        let control = RunControl::new();
        self.tracker.start(record, Some(control.clone()));

        let observer = Arc::new(ExecutionObserver {
            tracker: Arc::clone(&self.tracker),
            execution_id: execution_id.clone(),
            node_count: workflow.node_names().len(),
            finished_steps: AtomicUsize::new(0),
        });
        let options = self
            .engine
            .options()
            .with_values(values)
            .with_control(control)
            .with_observer(observer);

        tracing::info!(workflow = %name, execution_id = %execution_id, "integration: workflow execution started");

        match self.engine.run(&workflow, input, options).await {
            Ok(run) => {
                let output = run
                    .state
                    .get(OUTPUT_KEY)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(run.state.values().clone()));
                if let Some(error) = &run.state.error {
                    tracing::warn!(workflow = %name, error = %error, "integration: workflow recovered through its error handler");
                }
                let result = output.clone();
                let record = self.tracker.finish(&execution_id, |r| r.complete(result));
                self.persist(record.as_ref());

                Ok(WorkflowOutcome {
                    execution_id,
                    workflow: name.to_string(),
                    output,
                    state: run.state,
                    steps: run.steps,
                    elapsed_ms: run.elapsed_ms,
                })
            }
            Err(failure) => {
                tracing::warn!(workflow = %name, error = %failure, "integration: workflow execution failed");
                let structured = failure.to_failure();
                let record = self.tracker.finish(&execution_id, |r| r.fail(structured));
                self.persist(record.as_ref());
                Err(IntegrationError::Workflow(failure))
            }
        }
    }

    /// Pause a running workflow at its next node boundary.
    pub fn pause(&self, execution_id: &str) -> Result<(), IntegrationError> {
        let control = self.require_control(execution_id)?;
        self.tracker
            .update(execution_id, |r| r.pause())
            .ok_or_else(|| unknown_execution(execution_id))??;
        control.pause();
        tracing::info!(execution_id = %execution_id, "integration: execution paused");
        Ok(())
    }

    pub fn resume(&self, execution_id: &str) -> Result<(), IntegrationError> {
        let control = self.require_control(execution_id)?;
        self.tracker
            .update(execution_id, |r| r.resume())
            .ok_or_else(|| unknown_execution(execution_id))??;
        control.resume();
        tracing::info!(execution_id = %execution_id, "integration: execution resumed");
        Ok(())
    }

    /// Request cancellation; the record fails once the run reaches a node boundary.
    pub fn cancel(&self, execution_id: &str) -> Result<(), IntegrationError> {
        let control = self.require_control(execution_id)?;
        control.cancel();
        tracing::info!(execution_id = %execution_id, "integration: cancellation requested");
        Ok(())
    }

    fn require_control(&self, execution_id: &str) -> Result<RunControl, IntegrationError> {
        self.tracker
            .control(execution_id)
            .ok_or_else(|| unknown_execution(execution_id))
    }

    /// Live or recently finished execution.
    pub fn execution(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.tracker.get(execution_id)
    }

    /// Running and paused executions, oldest first.
    pub fn active_executions(&self) -> Vec<ExecutionRecord> {
        self.tracker.active()
    }

    /// Up to `n` finished executions, newest first.
    pub fn recent_executions(&self, n: usize) -> Vec<ExecutionRecord> {
        self.tracker.finished.recent(n)
    }

    /// Persisted executions, newest first. Empty without a store.
    pub fn stored_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, IntegrationError> {
        match &self.store {
            Some(store) => lock(store).list_executions(limit),
            None => Ok(Vec::new()),
        }
    }

    /// Persisted routing decisions, newest first. Empty without a store.
    pub fn stored_routing_decisions(&self, limit: usize) -> Result<Vec<RoutingDecision>, IntegrationError> {
        match &self.store {
            Some(store) => lock(store).routing_decisions(limit),
            None => Ok(Vec::new()),
        }
    }

    fn persist(&self, record: Option<&ExecutionRecord>) {
        let (Some(store), Some(record)) = (&self.store, record) else {
            return;
        };
        if let Err(e) = lock(store).save_execution(record) {
            tracing::warn!(execution_id = %record.id, error = %e, "integration: failed to persist execution");
        }
    }

    // ─── Processing ─────────────────────────────────────────────────────

    /// Classify `input` and handle it end to end. Never fails; errors are in the result.
    ///
    /// Casual input gets a canned reply. Task types bound to a workflow run
    /// that workflow with the context object's fields seeded into its state.
    /// Everything else goes through the agent router.
    pub async fn process(&self, input: &str, context: Option<&Value>) -> ProcessResult {
        let started = Instant::now();
        let classifier = self
            .router
            .as_ref()
            .map_or(&self.classifier, AgentRouter::classifier);
        let classification = classifier.classify(input, context);

        let mut result = ProcessResult {
            input: input.to_string(),
            classification: classification.clone(),
            route: ProcessRoute::Direct,
            output: Value::Null,
            steps: Vec::new(),
            logs: Vec::new(),
            success: false,
            elapsed_ms: 0,
            error: None,
        };

        if classification.is_casual {
            tracing::info!(task_type = %classification.task_type, "integration: casual input answered directly");
            result.output = Value::String(
                canned_reply(classification.task_type, &classification.language).to_string(),
            );
            result.success = true;
        } else if let Some(name) = self.task_workflows.get(&classification.task_type) {
            let values = context
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            match self.run_workflow(name, input, values).await {
                Ok(outcome) => {
                    result.logs = self.logs_of(&outcome.execution_id);
                    result.route = ProcessRoute::Workflow {
                        name: name.clone(),
                        execution_id: Some(outcome.execution_id),
                    };
                    result.success = outcome.state.error.is_none();
                    result.error = outcome
                        .state
                        .error
                        .as_ref()
                        .map(|e| Failure::new(ErrorKind::NodeExecutionError, e.clone()));
                    result.output = outcome.output;
                    result.steps = outcome.steps;
                }
                Err(e) => {
                    result.route = ProcessRoute::Workflow {
                        name: name.clone(),
                        execution_id: None,
                    };
                    result.error = Some(e.to_failure());
                }
            }
        } else {
            self.route_to_agent(input, context, &classification, &mut result)
                .await;
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }

    async fn route_to_agent(
        &self,
        input: &str,
        context: Option<&Value>,
        classification: &TaskClassification,
        result: &mut ProcessResult,
    ) {
        let Some(router) = &self.router else {
            result.route = ProcessRoute::Agent {
                decision: None,
                execution_result: None,
            };
            result.error = Some(Failure::new(
                ErrorKind::RoutingError,
                format!("no agent router configured for '{}'", classification.task_type),
            ));
            return;
        };

        let decision = match router.route(classification) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "integration: routing failed");
                result.route = ProcessRoute::Agent {
                    decision: None,
                    execution_result: None,
                };
                result.error = Some(e.to_failure());
                return;
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = lock(store).insert_routing_decision(input, &decision) {
                tracing::warn!(error = %e, "integration: failed to persist routing decision");
            }
        }

        let execution = router.execute(&decision, input, context).await;
        result.success = execution.success;
        result.error = execution.error.clone();
        result.output = Value::String(execution.content.clone());
        result.route = ProcessRoute::Agent {
            decision: Some(decision),
            execution_result: Some(execution),
        };
    }

    fn logs_of(&self, execution_id: &str) -> Vec<LogEntry> {
        self.tracker
            .get(execution_id)
            .map(|r| r.logs)
            .unwrap_or_default()
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn unknown_execution(id: &str) -> IntegrationError {
    IntegrationError::UnknownExecution { id: id.to_string() }
}

fn to_json<T: Serialize>(result: Result<T, IntegrationError>) -> Result<Value, IntegrationError> {
    result.and_then(|v| serde_json::to_value(v).map_err(IntegrationError::from))
}

/// Search, then answer `text` over the hits. Answering depends on the search
/// results, so this branch is sequential.
async fn research(
    caps: &CapabilitySet,
    text: &str,
) -> Vec<(CapabilityKind, Result<Value, IntegrationError>)> {
    let hits = caps.search(text, None, RESEARCH_HITS).await;
    let answer = match &hits {
        Ok(hits) => {
            let context = hits
                .iter()
                .map(|h| h.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            to_json(caps.answer_question(text, Some(context)).await)
        }
        Err(e) => Err(IntegrationError::CapabilityUnavailable {
            capability: CapabilityKind::QuestionAnswering,
            reason: format!("skipped: {e}"),
        }),
    };
    vec![
        (CapabilityKind::Search, to_json(hits)),
        (CapabilityKind::QuestionAnswering, answer),
    ]
}
