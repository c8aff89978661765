//! Workflow state and the patches nodes return.
//!
//! A [`WorkflowState`] is created fresh for each run. Nodes never mutate it
//! directly: they return a [`StatePatch`], which the engine validates and
//! merges (last writer wins per key).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys owned by the engine; patches may not write them.
pub const RESERVED_KEYS: &[&str] = &["input", "current_step", "error", "metadata"];

// ─── WorkflowState ──────────────────────────────────────────────────────────

/// Bookkeeping the engine maintains alongside step outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub workflow_id: String,
    pub workflow_name: String,
    /// ISO 8601.
    pub start_time: String,
    /// Nodes that completed successfully, in execution order.
    pub steps_completed: Vec<String>,
    /// Per-node confidence in [0, 1].
    pub confidence_scores: BTreeMap<String, f32>,
}

/// The shared state threaded through one workflow run.
///
/// Serializes with step outputs flattened next to the engine-owned fields:
/// `{ "input": ..., "current_step": ..., "summary": ..., "metadata": {...} }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub input: String,
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: StateMetadata,
    #[serde(flatten)]
    values: Map<String, Value>,
}

impl WorkflowState {
    /// Fresh state with a new unique `workflow_id`.
    pub fn new(workflow_name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            current_step: None,
            error: None,
            metadata: StateMetadata {
                workflow_id: uuid::Uuid::new_v4().to_string(),
                workflow_name: workflow_name.into(),
                start_time: chrono::Utc::now().to_rfc3339(),
                steps_completed: Vec::new(),
                confidence_scores: BTreeMap::new(),
            },
            values: Map::new(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.metadata.workflow_id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Step outputs only (no engine-owned fields).
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Text to work on: the `key` output when present, otherwise `input`.
    pub fn text_or_input(&self, key: &str) -> &str {
        self.get_str(key).unwrap_or(&self.input)
    }

    pub fn steps_completed(&self) -> &[String] {
        &self.metadata.steps_completed
    }

    pub fn confidence(&self, node: &str) -> Option<f32> {
        self.metadata.confidence_scores.get(node).copied()
    }

    /// Seed a value before the run starts. Reserved keys are ignored.
    pub(crate) fn seed(&mut self, key: String, value: Value) -> bool {
        if RESERVED_KEYS.contains(&key.as_str()) {
            return false;
        }
        self.values.insert(key, value);
        true
    }

    /// Merge a validated patch for `node` and mark it completed.
    ///
    /// A node that re-runs straight after itself is recorded once; the
    /// engine's step metrics still count every run.
    pub(crate) fn apply(&mut self, node: &str, patch: StatePatch) {
        let StatePatch { values, confidence } = patch;
        self.values.extend(values);
        if let Some(c) = confidence {
            self.metadata.confidence_scores.insert(node.to_string(), c);
        }
        let steps = &mut self.metadata.steps_completed;
        if steps.last().map(String::as_str) != Some(node) {
            steps.push(node.to_string());
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ─── StatePatch ─────────────────────────────────────────────────────────────

/// Partial state returned by a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    values: Map<String, Value>,
    confidence: Option<f32>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Confidence of this step, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        });
        self
    }

    pub fn confidence(&self) -> Option<f32> {
        self.confidence
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Map<String, Value>> for StatePatch {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values,
            confidence: None,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn each_state_gets_a_unique_id() {
        let a = WorkflowState::new("wf", "x");
        let b = WorkflowState::new("wf", "x");
        assert_ne!(a.workflow_id(), b.workflow_id());
    }

    #[test]
    fn apply_overrides_earlier_keys_and_records_step() {
        let mut state = WorkflowState::new("wf", "input text");
        state.apply("a", StatePatch::new().set("x", 1).set("y", 1));
        state.apply("b", StatePatch::new().set("y", 2).with_confidence(0.4));

        assert_eq!(state.get("x"), Some(&json!(1)));
        assert_eq!(state.get("y"), Some(&json!(2)));
        assert_eq!(state.steps_completed(), &["a".to_string(), "b".to_string()]);
        assert_eq!(state.confidence("b"), Some(0.4));
        assert_eq!(state.confidence("a"), None);
    }

    #[test]
    fn serializes_outputs_flat() {
        let mut state = WorkflowState::new("wf", "hello");
        state.apply("a", StatePatch::new().set("summary", "short"));
        let json = state.to_value();
        assert_eq!(json["input"], "hello");
        assert_eq!(json["summary"], "short");
        assert_eq!(json["metadata"]["steps_completed"], json!(["a"]));
        assert!(json.get("error").is_none());

        let back: WorkflowState = serde_json::from_value(json).unwrap();
        assert_eq!(back.get_str("summary"), Some("short"));
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(StatePatch::new().with_confidence(3.0).confidence(), Some(1.0));
        assert_eq!(StatePatch::new().with_confidence(-1.0).confidence(), Some(0.0));
        assert_eq!(StatePatch::new().with_confidence(f32::NAN).confidence(), Some(0.0));
    }

    #[test]
    fn seed_skips_reserved_keys() {
        let mut state = WorkflowState::new("wf", "x");
        assert!(!state.seed("metadata".into(), json!(1)));
        assert!(state.seed("document_content".into(), json!("text")));
        assert_eq!(state.text_or_input("document_content"), "text");
        assert_eq!(state.text_or_input("missing"), "x");
    }

    #[test]
    fn consecutive_reruns_are_recorded_once() {
        let mut state = WorkflowState::new("wf", "x");
        state.apply("a", StatePatch::new().set("n", 1));
        state.apply("a", StatePatch::new().set("n", 2).with_confidence(0.5));
        state.apply("b", StatePatch::new());
        state.apply("a", StatePatch::new());

        assert_eq!(state.steps_completed(), &["a", "b", "a"]);
        assert_eq!(state.get("n"), Some(&json!(2)));
        assert_eq!(state.confidence("a"), Some(0.5));
    }
}
