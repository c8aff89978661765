//! Shared types for the agent core.
//!
//! Task classifications, agent descriptors, routing decisions and routing
//! results used across the classifier, registry and router.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::failure::Failure;

// ─── Task Classification ────────────────────────────────────────────────────

/// Category assigned to an input by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CasualGreeting,
    CasualThanks,
    CasualSmallTalk,
    CodeGeneration,
    CodeRefactor,
    CodeReview,
    Debugging,
    CreativeWriting,
    DocumentAnalysis,
    FileProcessing,
    Research,
    QuestionAnswering,
    DataAnalysis,
    Translation,
    Unknown,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CasualGreeting => "casual_greeting",
            TaskType::CasualThanks => "casual_thanks",
            TaskType::CasualSmallTalk => "casual_small_talk",
            TaskType::CodeGeneration => "code_generation",
            TaskType::CodeRefactor => "code_refactor",
            TaskType::CodeReview => "code_review",
            TaskType::Debugging => "debugging",
            TaskType::CreativeWriting => "creative_writing",
            TaskType::DocumentAnalysis => "document_analysis",
            TaskType::FileProcessing => "file_processing",
            TaskType::Research => "research",
            TaskType::QuestionAnswering => "question_answering",
            TaskType::DataAnalysis => "data_analysis",
            TaskType::Translation => "translation",
            TaskType::Unknown => "unknown",
        }
    }

    /// Whether this type bypasses routing entirely.
    pub fn is_casual(&self) -> bool {
        matches!(
            self,
            TaskType::CasualGreeting | TaskType::CasualThanks | TaskType::CasualSmallTalk
        )
    }

    /// Lowercase word tokens of the type name (`code_refactor` → `code`, `refactor`).
    pub fn tokens(&self) -> impl Iterator<Item = &'static str> {
        self.as_str().split('_')
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency hint attached to a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Result of classifying one input. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskClassification {
    pub task_type: TaskType,
    /// In [0, 1].
    pub confidence: f32,
    pub priority: Priority,
    pub reasoning: String,
    #[serde(rename = "isCasual")]
    pub is_casual: bool,
    /// `en`, `es` or `fr`.
    pub language: String,
}

// ─── Agents ─────────────────────────────────────────────────────────────────

/// Registration key of an agent.
///
/// The well-known agents are closed variants; `Custom` is the explicit
/// extension point. Serializes as its string key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AgentKind {
    CodeAssistant,
    CreativeWriter,
    FileProcessor,
    DocumentAnalyst,
    ResearchAssistant,
    DataAnalyst,
    Translator,
    GeneralAssistant,
    Custom(String),
}

impl AgentKind {
    pub fn as_str(&self) -> &str {
        match self {
            AgentKind::CodeAssistant => "code_assistant",
            AgentKind::CreativeWriter => "creative_writer",
            AgentKind::FileProcessor => "file_processor",
            AgentKind::DocumentAnalyst => "document_analyst",
            AgentKind::ResearchAssistant => "research_assistant",
            AgentKind::DataAnalyst => "data_analyst",
            AgentKind::Translator => "translator",
            AgentKind::GeneralAssistant => "general_assistant",
            AgentKind::Custom(name) => name,
        }
    }
}

impl From<&str> for AgentKind {
    fn from(value: &str) -> Self {
        match value {
            "code_assistant" => AgentKind::CodeAssistant,
            "creative_writer" => AgentKind::CreativeWriter,
            "file_processor" => AgentKind::FileProcessor,
            "document_analyst" => AgentKind::DocumentAnalyst,
            "research_assistant" => AgentKind::ResearchAssistant,
            "data_analyst" => AgentKind::DataAnalyst,
            "translator" => AgentKind::Translator,
            "general_assistant" => AgentKind::GeneralAssistant,
            other => AgentKind::Custom(other.to_string()),
        }
    }
}

impl From<String> for AgentKind {
    fn from(value: String) -> Self {
        AgentKind::from(value.as_str())
    }
}

impl From<AgentKind> for String {
    fn from(kind: AgentKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for AgentKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AgentKind::from(s))
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named capability an agent advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapability {
    pub name: String,
    pub description: String,
}

/// Static description of a registered agent (the handler is stored alongside).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub kind: AgentKind,
    pub name: String,
    pub description: String,
    pub keywords: BTreeSet<String>,
    pub capabilities: Vec<AgentCapability>,
}

impl AgentDescriptor {
    pub fn new(kind: AgentKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: description.into(),
            keywords: BTreeSet::new(),
            capabilities: Vec::new(),
        }
    }

    /// Add keywords (lowercased).
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords
            .extend(keywords.into_iter().map(|k| k.as_ref().to_lowercase()));
        self
    }

    pub fn with_capability(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.capabilities.push(AgentCapability {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    /// Reference descriptor for one of the well-known agent kinds.
    ///
    /// `Custom` kinds get an empty descriptor named after the key.
    pub fn builtin(kind: AgentKind) -> Self {
        match kind {
            AgentKind::CodeAssistant => Self::new(kind, "Code Assistant", "Writes, refactors, reviews and debugs code")
                .with_keywords(["code", "refactor", "generation", "review", "debugging", "function"])
                .with_capability("code_generation", "Generate new code")
                .with_capability("code_refactor", "Restructure existing code")
                .with_capability("code_review", "Review code for defects")
                .with_capability("debugging", "Locate and fix bugs"),
            AgentKind::CreativeWriter => Self::new(kind, "Creative Writer", "Stories, poems and marketing copy")
                .with_keywords(["creative", "writing", "story", "poem"])
                .with_capability("creative_writing", "Compose original prose or verse"),
            AgentKind::FileProcessor => Self::new(kind, "File Processor", "Converts, renames and organizes files")
                .with_keywords(["file", "processing", "convert", "organize"])
                .with_capability("file_processing", "Batch file operations"),
            AgentKind::DocumentAnalyst => Self::new(kind, "Document Analyst", "Summarizes and analyzes documents")
                .with_keywords(["document", "analysis", "summary"])
                .with_capability("document_analysis", "Summaries, sentiment, entities"),
            AgentKind::ResearchAssistant => Self::new(kind, "Research Assistant", "Searches sources and answers questions")
                .with_keywords(["research", "question", "answering", "search"])
                .with_capability("research", "Multi-source research")
                .with_capability("question_answering", "Answer factual questions"),
            AgentKind::DataAnalyst => Self::new(kind, "Data Analyst", "Statistics, charts and tabular data")
                .with_keywords(["data", "analysis", "statistics"])
                .with_capability("data_analysis", "Analyze datasets"),
            AgentKind::Translator => Self::new(kind, "Translator", "Translates text between languages")
                .with_keywords(["translation", "translate", "language"])
                .with_capability("translation", "Translate text"),
            AgentKind::GeneralAssistant => Self::new(kind, "General Assistant", "Handles anything not claimed by a specialist")
                .with_keywords(["general", "help"]),
            AgentKind::Custom(ref name) => {
                let name = name.clone();
                Self::new(kind, name, "")
            }
        }
    }
}

/// What an agent returns from `execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub content: String,
    /// In [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AgentResult {
    pub fn new(content: impl Into<String>, confidence: f32) -> Self {
        Self {
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: None,
        }
    }
}

// ─── Routing ────────────────────────────────────────────────────────────────

/// Record of which agent was chosen for an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    #[serde(rename = "selectedAgent")]
    pub selected_agent: AgentKind,
    pub task_type: TaskType,
    pub confidence: f32,
    pub reasoning: String,
    /// True when the default agent was chosen because of low confidence or no overlap.
    pub fallback: bool,
    /// ISO 8601.
    pub timestamp: String,
}

/// Outcome of the selected agent's execution, including retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub content: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

/// Full JSON-serializable result of `route_and_execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    pub input: String,
    pub classification: TaskClassification,
    /// `None` for casual input (no routing happened) and for routing failures.
    pub decision: Option<RoutingDecision>,
    #[serde(rename = "executionResult")]
    pub execution_result: Option<ExecutionResult>,
    /// Canned reply for casual input, agent content otherwise.
    pub content: String,
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_tokens_split_on_underscore() {
        let tokens: Vec<_> = TaskType::CodeRefactor.tokens().collect();
        assert_eq!(tokens, vec!["code", "refactor"]);
        assert!(TaskType::CasualThanks.is_casual());
        assert!(!TaskType::Research.is_casual());
    }

    #[test]
    fn agent_kind_round_trips_through_strings() {
        assert_eq!(AgentKind::from("code_assistant"), AgentKind::CodeAssistant);
        assert_eq!(AgentKind::from("tax_helper"), AgentKind::Custom("tax_helper".into()));

        let json = serde_json::to_string(&AgentKind::CodeAssistant).unwrap();
        assert_eq!(json, "\"code_assistant\"");
        let back: AgentKind = serde_json::from_str("\"tax_helper\"").unwrap();
        assert_eq!(back, AgentKind::Custom("tax_helper".into()));
    }

    #[test]
    fn classification_uses_is_casual_wire_name() {
        let c = TaskClassification {
            task_type: TaskType::CasualGreeting,
            confidence: 0.95,
            priority: Priority::Low,
            reasoning: "greeting".into(),
            is_casual: true,
            language: "en".into(),
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["isCasual"], true);
        assert_eq!(json["task_type"], "casual_greeting");
        assert_eq!(json["priority"], "low");
    }

    #[test]
    fn descriptor_keywords_are_lowercased_sets() {
        let d = AgentDescriptor::new(AgentKind::Translator, "T", "")
            .with_keywords(["Translate", "translate", "LANGUAGE"]);
        assert_eq!(d.keywords.len(), 2);
        assert!(d.keywords.contains("translate"));
        assert!(d.keywords.contains("language"));
    }

    #[test]
    fn builtin_code_assistant_advertises_refactor() {
        let d = AgentDescriptor::builtin(AgentKind::CodeAssistant);
        assert!(d.capabilities.iter().any(|c| c.name == "code_refactor"));
        assert!(d.keywords.contains("refactor"));
    }

    #[test]
    fn agent_result_clamps_confidence() {
        assert_eq!(AgentResult::new("x", 1.7).confidence, 1.0);
        assert_eq!(AgentResult::new("x", -0.2).confidence, 0.0);
    }
}
