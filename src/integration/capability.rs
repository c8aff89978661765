//! Capability contract and its request/response payloads.
//!
//! A capability is an external collaborator (document analysis, semantic
//! search, question answering, structure extraction) that can be initialized
//! independently and may be unavailable at any time. The manager only ever
//! talks to capabilities through [`Capability::invoke`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::IntegrationError;

// ─── Kinds ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    DocumentAnalysis,
    Search,
    QuestionAnswering,
    StructureExtraction,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::DocumentAnalysis,
        CapabilityKind::Search,
        CapabilityKind::QuestionAnswering,
        CapabilityKind::StructureExtraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::DocumentAnalysis => "document_analysis",
            CapabilityKind::Search => "search",
            CapabilityKind::QuestionAnswering => "question_answering",
            CapabilityKind::StructureExtraction => "structure_extraction",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Requests ───────────────────────────────────────────────────────────────

fn default_search_limit() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapabilityRequest {
    AnalyzeDocument {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    Search {
        query: String,
        /// Supported keys depend on the capability (e.g. `min_score`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filters: Option<serde_json::Value>,
        #[serde(default = "default_search_limit")]
        limit: usize,
    },
    AnswerQuestion {
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    ExtractStructure {
        text: String,
    },
}

impl CapabilityRequest {
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityRequest::AnalyzeDocument { .. } => "analyze_document",
            CapabilityRequest::Search { .. } => "search",
            CapabilityRequest::AnswerQuestion { .. } => "answer_question",
            CapabilityRequest::ExtractStructure { .. } => "extract_structure",
        }
    }

    /// The capability that serves this request.
    pub fn target(&self) -> CapabilityKind {
        match self {
            CapabilityRequest::AnalyzeDocument { .. } => CapabilityKind::DocumentAnalysis,
            CapabilityRequest::Search { .. } => CapabilityKind::Search,
            CapabilityRequest::AnswerQuestion { .. } => CapabilityKind::QuestionAnswering,
            CapabilityRequest::ExtractStructure { .. } => CapabilityKind::StructureExtraction,
        }
    }

    pub fn search(query: impl Into<String>, limit: usize) -> Self {
        CapabilityRequest::Search {
            query: query.into(),
            filters: None,
            limit,
        }
    }
}

// ─── Responses ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// `positive`, `negative` or `neutral`.
    pub label: String,
    /// Strength of the label in [0, 1].
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub mentions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub summary: String,
    pub sentiment: Sentiment,
    pub keywords: Vec<String>,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    /// In [0, 1].
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    /// In [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub title: Option<String>,
    pub sections: Vec<Section>,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CapabilityResponse {
    Analysis(DocumentAnalysis),
    SearchResults(Vec<SearchHit>),
    Answer(Answer),
    Structure(DocumentStructure),
}

impl CapabilityResponse {
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityResponse::Analysis(_) => "analysis",
            CapabilityResponse::SearchResults(_) => "search_results",
            CapabilityResponse::Answer(_) => "answer",
            CapabilityResponse::Structure(_) => "structure",
        }
    }
}

// ─── Capability Contract ────────────────────────────────────────────────────

/// An independently initializable external collaborator.
#[async_trait]
pub trait Capability: Send + Sync {
    fn kind(&self) -> CapabilityKind;

    /// Prepare the capability (load indexes, open connections). Idempotent.
    async fn initialize(&self) -> Result<(), IntegrationError>;

    fn is_available(&self) -> bool;

    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse, IntegrationError>;
}

// ─── CapabilitySet ──────────────────────────────────────────────────────────

/// Registered capabilities plus the per-call timeout. Cheap to clone.
///
/// Every call checks availability first, so an uninitialized or unreachable
/// capability yields `CapabilityUnavailable` instead of an invocation.
#[derive(Clone)]
pub struct CapabilitySet {
    capabilities: Arc<BTreeMap<CapabilityKind, Arc<dyn Capability>>>,
    timeout: Duration,
}

impl CapabilitySet {
    /// Later capabilities of the same kind replace earlier ones.
    pub fn new<I>(capabilities: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Capability>>,
    {
        let capabilities = capabilities.into_iter().map(|c| (c.kind(), c)).collect();
        Self {
            capabilities: Arc::new(capabilities),
            timeout,
        }
    }

    pub fn get(&self, kind: CapabilityKind) -> Option<&Arc<dyn Capability>> {
        self.capabilities.get(&kind)
    }

    pub fn kinds(&self) -> Vec<CapabilityKind> {
        self.capabilities.keys().copied().collect()
    }

    pub fn is_available(&self, kind: CapabilityKind) -> bool {
        self.get(kind).is_some_and(|c| c.is_available())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Initialize every capability. Failures are logged and returned, never fatal.
    pub async fn initialize_all(&self) -> Vec<(CapabilityKind, IntegrationError)> {
        let mut failures = Vec::new();
        for (kind, capability) in self.capabilities.iter() {
            match capability.initialize().await {
                Ok(()) => tracing::info!(capability = %kind, "integration: capability initialized"),
                Err(e) => {
                    tracing::warn!(capability = %kind, error = %e, "integration: capability failed to initialize");
                    failures.push((*kind, e));
                }
            }
        }
        failures
    }

    /// Invoke `kind` with `request`, bounded by the per-call timeout.
    pub async fn execute(
        &self,
        kind: CapabilityKind,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, IntegrationError> {
        if request.target() != kind {
            return Err(IntegrationError::UnsupportedRequest {
                capability: kind,
                request: request.name(),
            });
        }
        let capability = self
            .get(kind)
            .ok_or_else(|| IntegrationError::CapabilityUnavailable {
                capability: kind,
                reason: "not registered".into(),
            })?;
        if !capability.is_available() {
            return Err(IntegrationError::CapabilityUnavailable {
                capability: kind,
                reason: "not initialized or unreachable".into(),
            });
        }

        // Dropping the future on timeout aborts the in-flight call.
        match tokio::time::timeout(self.timeout, capability.invoke(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(capability = %kind, timeout_ms = self.timeout.as_millis() as u64, "integration: capability call timed out");
                Err(IntegrationError::CapabilityTimeout {
                    capability: kind,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn analyze_document(
        &self,
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<DocumentAnalysis, IntegrationError> {
        let kind = CapabilityKind::DocumentAnalysis;
        let request = CapabilityRequest::AnalyzeDocument {
            text: text.to_string(),
            metadata,
        };
        match self.execute(kind, request).await? {
            CapabilityResponse::Analysis(analysis) => Ok(analysis),
            other => Err(unexpected(kind, &other)),
        }
    }

    pub async fn search(
        &self,
        query: &str,
        filters: Option<serde_json::Value>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, IntegrationError> {
        let kind = CapabilityKind::Search;
        let request = CapabilityRequest::Search {
            query: query.to_string(),
            filters,
            limit,
        };
        match self.execute(kind, request).await? {
            CapabilityResponse::SearchResults(hits) => Ok(hits),
            other => Err(unexpected(kind, &other)),
        }
    }

    pub async fn answer_question(
        &self,
        question: &str,
        context: Option<String>,
    ) -> Result<Answer, IntegrationError> {
        let kind = CapabilityKind::QuestionAnswering;
        let request = CapabilityRequest::AnswerQuestion {
            question: question.to_string(),
            context,
        };
        match self.execute(kind, request).await? {
            CapabilityResponse::Answer(answer) => Ok(answer),
            other => Err(unexpected(kind, &other)),
        }
    }

    pub async fn extract_structure(&self, text: &str) -> Result<DocumentStructure, IntegrationError> {
        let kind = CapabilityKind::StructureExtraction;
        let request = CapabilityRequest::ExtractStructure {
            text: text.to_string(),
        };
        match self.execute(kind, request).await? {
            CapabilityResponse::Structure(structure) => Ok(structure),
            other => Err(unexpected(kind, &other)),
        }
    }
}

fn unexpected(kind: CapabilityKind, response: &CapabilityResponse) -> IntegrationError {
    IntegrationError::failed(kind, format!("unexpected '{}' response", response.name()))
}
