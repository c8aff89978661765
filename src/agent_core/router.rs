//! AgentRouter — picks an agent for a classified input and executes it.
//!
//! Pipeline for [`AgentRouter::route_and_execute`]:
//! 1. Classify the input.
//! 2. Casual input short-circuits with a canned reply; no agent is invoked.
//! 3. [`AgentRouter::route`] scores every registered agent against the task
//!    type and applies the confidence threshold / fallback policy.
//! 4. The selected agent runs with retry (transient errors only) inside one
//!    overall deadline.
//!
//! Every successful routing decision is appended to the [`RoutingHistory`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RouterConfig;

use super::classifier::InputClassifier;
use super::errors::AgentError;
use super::history::RoutingHistory;
use super::registry::AgentRegistry;
use super::types::{
    AgentDescriptor, AgentKind, ExecutionResult, RoutingDecision, RoutingResult, TaskClassification, TaskType,
};

/// Overlap points for each agent keyword found among the task-type tokens.
const KEYWORD_POINTS: u32 = 1;

/// Overlap points when a capability name equals the task type.
const CAPABILITY_POINTS: u32 = 2;

// ─── AgentRouter ────────────────────────────────────────────────────────────

pub struct AgentRouter {
    classifier: InputClassifier,
    registry: Arc<AgentRegistry>,
    config: RouterConfig,
    history: Arc<RoutingHistory>,
}

impl AgentRouter {
    pub fn new(registry: AgentRegistry, config: RouterConfig) -> Self {
        let history = Arc::new(RoutingHistory::new(config.history_capacity));
        Self {
            classifier: InputClassifier::default(),
            registry: Arc::new(registry),
            config,
            history,
        }
    }

    pub fn with_classifier(mut self, classifier: InputClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &InputClassifier {
        &self.classifier
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Shared handle to the routing history (for stats and persistence).
    pub fn history(&self) -> Arc<RoutingHistory> {
        Arc::clone(&self.history)
    }

    // ─── Routing ────────────────────────────────────────────────────────

    /// Select an agent for a classification.
    ///
    /// Agents are scored in registration order and only a strictly higher
    /// score replaces the current best, so the first-registered agent wins
    /// ties. Low confidence or zero overlap falls back to the default agent
    /// when fallback is enabled.
    pub fn route(&self, classification: &TaskClassification) -> Result<RoutingDecision, AgentError> {
        if classification.is_casual {
            return Err(AgentError::Routing {
                reason: "casual input is answered directly and never routed".into(),
            });
        }

        let threshold = self.config.confidence_threshold;
        let decision = if classification.confidence < threshold {
            self.fallback(
                classification,
                format!(
                    "confidence {:.2} below threshold {:.2}",
                    classification.confidence, threshold
                ),
            )?
        } else {
            match self.best_overlap(classification.task_type) {
                Some((kind, score)) => RoutingDecision {
                    selected_agent: kind,
                    task_type: classification.task_type,
                    confidence: classification.confidence,
                    reasoning: format!(
                        "best overlap with {} (score {score})",
                        classification.task_type
                    ),
                    fallback: false,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                },
                None => self.fallback(
                    classification,
                    format!("no registered agent matches {}", classification.task_type),
                )?,
            }
        };

        tracing::info!(
            agent = %decision.selected_agent,
            task_type = %decision.task_type,
            confidence = decision.confidence,
            fallback = decision.fallback,
            "router: agent selected"
        );
        self.history.record(decision.clone());
        Ok(decision)
    }

    fn fallback(
        &self,
        classification: &TaskClassification,
        why: String,
    ) -> Result<RoutingDecision, AgentError> {
        if !self.config.enable_fallback {
            return Err(if classification.task_type == TaskType::Unknown {
                AgentError::Classification { reason: why }
            } else {
                AgentError::Routing { reason: why }
            });
        }

        let default = &self.config.default_agent;
        if !self.registry.contains(default) {
            return Err(AgentError::UnknownAgent {
                kind: default.clone(),
            });
        }

        Ok(RoutingDecision {
            selected_agent: default.clone(),
            task_type: classification.task_type,
            confidence: classification.confidence,
            reasoning: format!("{why}; falling back to {default}"),
            fallback: true,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Highest-overlap agent for a task type, `None` when nothing overlaps.
    fn best_overlap(&self, task_type: TaskType) -> Option<(AgentKind, u32)> {
        let mut best: Option<(AgentKind, u32)> = None;

        for agent in self.registry.iter() {
            let score = overlap_score(&agent.descriptor, task_type);
            let current = best.as_ref().map(|(_, s)| *s).unwrap_or(0);
            if score > current {
                best = Some((agent.descriptor.kind.clone(), score));
            }
        }

        best
    }

    // ─── Execution ──────────────────────────────────────────────────────

    /// Run the selected agent with retry, bounded by the router timeout.
    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        input: &str,
        context: Option<&serde_json::Value>,
    ) -> ExecutionResult {
        let start = Instant::now();
        let agent = decision.selected_agent.clone();

        let Some(registered) = self.registry.get(&agent) else {
            return failed_execution(AgentError::UnknownAgent { kind: agent }, 0, start);
        };

        let timeout = self.config.timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let max_retries = self.config.max_retries;
        let base_delay = self.config.retry_base_delay();
        let mut attempts = 0u32;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                // A delay that overflows can never fit in the budget either.
                let Some(delay) = 2u32
                    .checked_pow(attempt - 1)
                    .and_then(|factor| base_delay.checked_mul(factor))
                else {
                    break;
                };
                let fits = tokio::time::Instant::now()
                    .checked_add(delay)
                    .is_some_and(|resume_at| resume_at < deadline);
                if !fits {
                    break;
                }
                tracing::debug!(agent = %agent, attempt, ?delay, "router: retrying agent");
                tokio::time::sleep(delay).await;
            }

            attempts += 1;
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, registered.handler.execute(input, context)).await {
                Ok(Ok(result)) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    tracing::info!(agent = %agent, attempts, elapsed_ms, "router: agent succeeded");
                    return ExecutionResult {
                        success: true,
                        content: result.content,
                        confidence: result.confidence,
                        metadata: result.metadata,
                        attempts,
                        elapsed_ms,
                        error: None,
                    };
                }
                Ok(Err(e)) => {
                    if e.is_retriable() && attempt < max_retries {
                        tracing::warn!(agent = %agent, attempt, error = %e, "router: transient agent failure");
                        continue;
                    }
                    tracing::warn!(agent = %agent, attempts, error = %e, "router: agent failed");
                    return failed_execution(e, attempts, start);
                }
                Err(_) => break,
            }
        }

        // Overall budget exhausted, either mid-call or before the next retry.
        let err = AgentError::Timeout {
            agent: agent.clone(),
            timeout_ms: duration_ms(timeout),
        };
        tracing::warn!(agent = %agent, attempts, "router: agent timed out");
        failed_execution(err, attempts, start)
    }

    /// Classify, route and execute one input.
    ///
    /// Never fails: errors are reported in the result's `error` field.
    pub async fn route_and_execute(
        &self,
        input: &str,
        context: Option<&serde_json::Value>,
    ) -> RoutingResult {
        let start = Instant::now();
        let classification = self.classifier.classify(input, context);

        if classification.is_casual {
            let content = canned_reply(classification.task_type, &classification.language).to_string();
            tracing::info!(task_type = %classification.task_type, "router: casual input answered directly");
            return RoutingResult {
                input: input.to_string(),
                classification,
                decision: None,
                execution_result: None,
                content,
                success: true,
                elapsed_ms: start.elapsed().as_millis() as u64,
                error: None,
            };
        }

        let decision = match self.route(&classification) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "router: routing failed");
                return RoutingResult {
                    input: input.to_string(),
                    classification,
                    decision: None,
                    execution_result: None,
                    content: String::new(),
                    success: false,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    error: Some(e.to_failure()),
                };
            }
        };

        let execution = self.execute(&decision, input, context).await;

        RoutingResult {
            input: input.to_string(),
            classification,
            decision: Some(decision),
            content: execution.content.clone(),
            success: execution.success,
            error: execution.error.clone(),
            execution_result: Some(execution),
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

// ─── Free Functions ─────────────────────────────────────────────────────────

/// Keyword/capability overlap between a descriptor and a task type.
pub fn overlap_score(descriptor: &AgentDescriptor, task_type: TaskType) -> u32 {
    let keyword_hits = task_type
        .tokens()
        .filter(|t| descriptor.keywords.contains(*t))
        .count() as u32;
    let capability_hit = descriptor
        .capabilities
        .iter()
        .any(|c| c.name == task_type.as_str());

    keyword_hits * KEYWORD_POINTS + if capability_hit { CAPABILITY_POINTS } else { 0 }
}

/// Direct reply for casual input, in the detected language.
pub fn canned_reply(task_type: TaskType, language: &str) -> &'static str {
    match (task_type, language) {
        (TaskType::CasualThanks, "es") => "¡De nada! ¿Necesitas algo más?",
        (TaskType::CasualThanks, "fr") => "Avec plaisir ! Autre chose ?",
        (TaskType::CasualThanks, _) => "You're welcome! Anything else I can help with?",
        (TaskType::CasualSmallTalk, "es") => "¡Todo bien por aquí! ¿En qué te puedo ayudar?",
        (TaskType::CasualSmallTalk, "fr") => "Tout va bien ! Comment puis-je vous aider ?",
        (TaskType::CasualSmallTalk, _) => "Doing well, thanks for asking! What can I do for you?",
        (_, "es") => "¡Hola! ¿En qué te puedo ayudar hoy?",
        (_, "fr") => "Bonjour ! Comment puis-je vous aider aujourd'hui ?",
        _ => "Hello! How can I help you today?",
    }
}

fn failed_execution(err: AgentError, attempts: u32, start: Instant) -> ExecutionResult {
    ExecutionResult {
        success: false,
        content: String::new(),
        confidence: 0.0,
        metadata: None,
        attempts,
        elapsed_ms: start.elapsed().as_millis() as u64,
        error: Some(err.to_failure()),
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::agent_core::registry::{agent_fn, Agent};
    use crate::agent_core::types::{AgentDescriptor, AgentResult, Priority};
    use crate::failure::ErrorKind;

    fn counting_agent(label: &'static str, calls: Arc<AtomicUsize>) -> Arc<dyn Agent> {
        agent_fn(move |input, _| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(AgentResult::new(format!("{label}: {input}"), 0.9))
            }
        })
    }

    fn fast_config() -> RouterConfig {
        RouterConfig {
            retry_base_delay_ms: 1,
            ..RouterConfig::default()
        }
    }

    fn standard_router(calls: Arc<AtomicUsize>) -> AgentRouter {
        let mut registry = AgentRegistry::new();
        for kind in [
            AgentKind::CodeAssistant,
            AgentKind::CreativeWriter,
            AgentKind::DocumentAnalyst,
            AgentKind::GeneralAssistant,
        ] {
            let label: &'static str = match kind {
                AgentKind::CodeAssistant => "code",
                AgentKind::CreativeWriter => "creative",
                AgentKind::DocumentAnalyst => "docs",
                _ => "general",
            };
            registry
                .register(AgentDescriptor::builtin(kind), counting_agent(label, Arc::clone(&calls)))
                .unwrap();
        }
        AgentRouter::new(registry, fast_config())
    }

    fn classification(task_type: TaskType, confidence: f32) -> TaskClassification {
        TaskClassification {
            task_type,
            confidence,
            priority: Priority::Normal,
            reasoning: String::new(),
            is_casual: false,
            language: "en".into(),
        }
    }

    #[tokio::test]
    async fn hi_short_circuits_without_invoking_agents() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = standard_router(Arc::clone(&calls));

        let result = router.route_and_execute("hi", None).await;
        assert!(result.classification.is_casual);
        assert_eq!(result.classification.task_type, TaskType::CasualGreeting);
        assert!((result.classification.confidence - 0.95).abs() < 1e-6);
        assert!(result.decision.is_none());
        assert!(result.execution_result.is_none());
        assert!(result.success);
        assert_eq!(result.content, "Hello! How can I help you today?");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(router.history().is_empty());
    }

    #[tokio::test]
    async fn casual_inputs_never_reach_an_agent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = standard_router(Arc::clone(&calls));
        for input in ["hello", "thanks!", "gracias", "hola", "merci", "bonjour", "how are you"] {
            let result = router.route_and_execute(input, None).await;
            assert!(result.classification.is_casual, "{input}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let es = router.route_and_execute("gracias", None).await;
        assert_eq!(es.content, "¡De nada! ¿Necesitas algo más?");
    }

    #[tokio::test]
    async fn refactor_this_code_selects_code_assistant() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = standard_router(Arc::clone(&calls));

        let result = router.route_and_execute("refactor this code", None).await;
        assert_eq!(result.classification.task_type, TaskType::CodeRefactor);
        assert!((result.classification.confidence - 0.86).abs() < 1e-5);
        let decision = result.decision.as_ref().unwrap();
        assert_eq!(decision.selected_agent, AgentKind::CodeAssistant);
        assert!(!decision.fallback);
        let exec = result.execution_result.as_ref().unwrap();
        assert!(exec.success);
        assert_eq!(exec.attempts, 1);
        assert_eq!(result.content, "code: refactor this code");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["decision"]["selectedAgent"], "code_assistant");
        assert_eq!(json["executionResult"]["success"], true);
    }

    #[test]
    fn low_confidence_always_selects_default_agent() {
        let router = standard_router(Arc::new(AtomicUsize::new(0)));
        for task_type in [TaskType::CodeRefactor, TaskType::CreativeWriting, TaskType::Unknown] {
            for confidence in [0.0, 0.3, 0.64, 0.69] {
                let decision = router.route(&classification(task_type, confidence)).unwrap();
                assert_eq!(decision.selected_agent, AgentKind::GeneralAssistant);
                assert!(decision.fallback);
            }
        }
    }

    #[tokio::test]
    async fn empty_input_falls_back_to_default() {
        let router = standard_router(Arc::new(AtomicUsize::new(0)));
        let result = router.route_and_execute("   ", None).await;
        assert_eq!(result.classification.task_type, TaskType::Unknown);
        assert_eq!(
            result.decision.as_ref().unwrap().selected_agent,
            AgentKind::GeneralAssistant
        );
    }

    #[test]
    fn fallback_disabled_reports_routing_and_classification_errors() {
        let mut registry = AgentRegistry::new();
        registry
            .register(
                AgentDescriptor::builtin(AgentKind::CodeAssistant),
                counting_agent("code", Arc::new(AtomicUsize::new(0))),
            )
            .unwrap();
        let config = RouterConfig {
            enable_fallback: false,
            ..fast_config()
        };
        let router = AgentRouter::new(registry, config);

        let err = router.route(&classification(TaskType::CodeReview, 0.64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RoutingError);

        let err = router.route(&classification(TaskType::Unknown, 0.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClassificationError);

        // Confident but nothing overlaps: also a routing error.
        let err = router.route(&classification(TaskType::Translation, 0.9)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RoutingError);
        assert!(router.history().is_empty());
    }

    #[test]
    fn ties_go_to_first_registered_agent() {
        let make = |order: [&str; 2]| {
            let mut registry = AgentRegistry::new();
            for name in order {
                let descriptor = AgentDescriptor::new(AgentKind::Custom(name.into()), name, "")
                    .with_keywords(["translation"]);
                registry
                    .register(descriptor, counting_agent("x", Arc::new(AtomicUsize::new(0))))
                    .unwrap();
            }
            AgentRouter::new(registry, fast_config())
        };

        let ab = make(["alpha", "beta"]);
        let decision = ab.route(&classification(TaskType::Translation, 0.9)).unwrap();
        assert_eq!(decision.selected_agent, AgentKind::Custom("alpha".into()));

        let ba = make(["beta", "alpha"]);
        let decision = ba.route(&classification(TaskType::Translation, 0.9)).unwrap();
        assert_eq!(decision.selected_agent, AgentKind::Custom("beta".into()));
    }

    #[test]
    fn capability_match_outweighs_single_keyword() {
        let code = AgentDescriptor::builtin(AgentKind::CodeAssistant);
        let generic = AgentDescriptor::new(AgentKind::Custom("x".into()), "x", "")
            .with_keywords(["code"]);
        assert!(overlap_score(&code, TaskType::CodeReview) > overlap_score(&generic, TaskType::CodeReview));
        assert_eq!(overlap_score(&generic, TaskType::Translation), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let flaky = agent_fn(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AgentError::transient(AgentKind::CodeAssistant, "rate limited"))
                } else {
                    Ok(AgentResult::new("done", 0.8))
                }
            }
        });
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::builtin(AgentKind::CodeAssistant), flaky)
            .unwrap();
        let router = AgentRouter::new(registry, fast_config());

        let result = router.route_and_execute("refactor this code", None).await;
        let exec = result.execution_result.unwrap();
        assert!(exec.success);
        assert_eq!(exec.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let broken = agent_fn(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::permanent(AgentKind::CodeAssistant, "invalid request"))
            }
        });
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::builtin(AgentKind::CodeAssistant), broken)
            .unwrap();
        let router = AgentRouter::new(registry, fast_config());

        let result = router.route_and_execute("refactor this code", None).await;
        assert!(!result.success);
        let exec = result.execution_result.unwrap();
        assert_eq!(exec.attempts, 1);
        assert_eq!(exec.error.unwrap().kind, ErrorKind::NodeExecutionError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exhaust_after_max_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let always_flaky = agent_fn(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::transient(AgentKind::CodeAssistant, "503"))
            }
        });
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::builtin(AgentKind::CodeAssistant), always_flaky)
            .unwrap();
        let router = AgentRouter::new(registry, fast_config());

        let result = router.route_and_execute("refactor this code", None).await;
        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn huge_retry_budget_without_delay_fails_cleanly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let always_flaky = agent_fn(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::transient(AgentKind::CodeAssistant, "503"))
            }
        });
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::builtin(AgentKind::CodeAssistant), always_flaky)
            .unwrap();
        // Past 2^31 the backoff factor no longer fits in a u32.
        let config = RouterConfig {
            max_retries: 40,
            retry_base_delay_ms: 0,
            ..RouterConfig::default()
        };
        let router = AgentRouter::new(registry, config);

        let result = router.route_and_execute("refactor this code", None).await;
        assert!(!result.success);
        let exec = result.execution_result.unwrap();
        assert!(!exec.success);
        assert_eq!(exec.attempts, 33);
        assert_eq!(calls.load(Ordering::SeqCst), 33);
    }

    #[tokio::test]
    async fn slow_agent_hits_overall_timeout() {
        let slow = agent_fn(|_, _| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(AgentResult::new("late", 0.9))
        });
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::builtin(AgentKind::CodeAssistant), slow)
            .unwrap();
        let config = RouterConfig {
            timeout_ms: 30,
            ..fast_config()
        };
        let router = AgentRouter::new(registry, config);

        let result = router.route_and_execute("refactor this code", None).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, ErrorKind::TimeoutError);
    }

    #[tokio::test]
    async fn decisions_are_recorded_in_history() {
        let router = standard_router(Arc::new(AtomicUsize::new(0)));
        router.route_and_execute("refactor this code", None).await;
        router.route_and_execute("write a poem about the sea", None).await;
        router.route_and_execute("purple elephants", None).await;

        let stats = router.history().stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.per_agent.get("code_assistant"), Some(&1));
        assert_eq!(stats.per_agent.get("creative_writer"), Some(&1));
        assert_eq!(stats.fallback_count, 1);
        assert_eq!(router.history().recent(1)[0].selected_agent, AgentKind::GeneralAssistant);
    }

    #[test]
    fn missing_default_agent_is_reported() {
        let router = AgentRouter::new(AgentRegistry::new(), fast_config());
        let err = router.route(&classification(TaskType::Unknown, 0.0)).unwrap_err();
        assert!(matches!(err, AgentError::UnknownAgent { .. }));
    }
}
