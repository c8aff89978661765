//! Built-in offline capabilities.
//!
//! Deterministic lexical heuristics that stand in for provider-backed
//! capabilities when none are configured. Each one must be initialized
//! before the manager will route requests to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::agent_core::classifier::tokenize;

use super::capability::{
    Answer, Capability, CapabilityKind, CapabilityRequest, CapabilityResponse, DocumentAnalysis,
    DocumentStructure, Entity, Section, SearchHit, Sentiment,
};
use super::errors::IntegrationError;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "more", "most", "my",
    "no", "not", "of", "on", "or", "our", "out", "she", "so", "some", "such", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "too", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "why", "will",
    "with", "would", "you", "your",
];

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "positive", "success", "successful", "improve", "improved",
    "benefit", "happy", "love", "strong", "growth", "efficient", "reliable", "win", "best",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "poor", "negative", "fail", "failed", "failure", "problem", "issue", "risk", "loss",
    "sad", "hate", "weak", "decline", "slow", "broken", "worst", "error",
];

const MAX_KEYWORDS: usize = 8;
const MAX_TOPICS: usize = 5;
const SUMMARY_SENTENCES: usize = 2;

// ─── Text Helpers ───────────────────────────────────────────────────────────

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Non-stopword tokens, in order.
fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stopword(t))
        .collect()
}

/// Sentences end at a newline, or at `.`/`!`/`?` followed by whitespace or end of text.
/// Heading lines are skipped.
pub(crate) fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        let boundary = c == '\n'
            || (matches!(c, '.' | '!' | '?')
                && chars.peek().map_or(true, |(_, next)| next.is_whitespace()));
        if boundary {
            let end = idx + c.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    out.push(&text[start..]);
    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .collect()
}

/// Most frequent content words of four or more characters; ties keep first-seen order.
pub(crate) fn top_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in content_tokens(text) {
        if token.chars().count() < 4 || token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let count = counts.entry(token.clone()).or_insert(0);
        if *count == 0 {
            order.push(token);
        }
        *count += 1;
    }
    // Stable sort keeps first-seen order among equal counts.
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.truncate(limit);
    order
}

fn summarize(text: &str) -> String {
    sentences(text)
        .into_iter()
        .take(SUMMARY_SENTENCES)
        .collect::<Vec<_>>()
        .join(" ")
}

fn sentiment_of(text: &str) -> Sentiment {
    let tokens = tokenize(text);
    let positive = tokens.iter().filter(|t| POSITIVE_WORDS.contains(&t.as_str())).count();
    let negative = tokens.iter().filter(|t| NEGATIVE_WORDS.contains(&t.as_str())).count();
    let total = positive + negative;
    if total == 0 || positive == negative {
        return Sentiment {
            label: "neutral".to_string(),
            score: 0.5,
        };
    }
    let (label, hits) = if positive > negative {
        ("positive", positive)
    } else {
        ("negative", negative)
    };
    Sentiment {
        label: label.to_string(),
        score: hits as f32 / total as f32,
    }
}

/// Capitalized words that do not open a sentence, plus e-mail addresses.
fn entities_of(text: &str) -> Vec<Entity> {
    let mut order: Vec<(String, &'static str)> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for sentence in sentences(text) {
        for (i, raw) in sentence.split_whitespace().enumerate() {
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '.');
            let word = word.trim_end_matches('.');
            let kind = if word.contains('@') && word.contains('.') {
                "email"
            } else if i > 0
                && word.chars().next().is_some_and(char::is_uppercase)
                && word.chars().all(char::is_alphanumeric)
                && !is_stopword(&word.to_lowercase())
            {
                "name"
            } else {
                continue;
            };
            let count = counts.entry(word.to_string()).or_insert(0);
            if *count == 0 {
                order.push((word.to_string(), kind));
            }
            *count += 1;
        }
    }

    order
        .into_iter()
        .map(|(text, kind)| Entity {
            mentions: counts[&text],
            text,
            kind: kind.to_string(),
        })
        .collect()
}

fn require_text(kind: CapabilityKind, text: &str) -> Result<(), IntegrationError> {
    if text.trim().is_empty() {
        return Err(IntegrationError::failed(kind, "empty input text"));
    }
    Ok(())
}

fn unsupported(kind: CapabilityKind, request: &CapabilityRequest) -> IntegrationError {
    IntegrationError::UnsupportedRequest {
        capability: kind,
        request: request.name(),
    }
}

// ─── LexicalAnalyzer ────────────────────────────────────────────────────────

/// Summary, sentiment, keywords and entities from word statistics.
#[derive(Debug, Default)]
pub struct LexicalAnalyzer {
    ready: AtomicBool,
}

impl LexicalAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze(&self, text: &str) -> Result<DocumentAnalysis, IntegrationError> {
        require_text(CapabilityKind::DocumentAnalysis, text)?;
        Ok(DocumentAnalysis {
            summary: summarize(text),
            sentiment: sentiment_of(text),
            keywords: top_keywords(text, MAX_KEYWORDS),
            entities: entities_of(text),
        })
    }
}

#[async_trait]
impl Capability for LexicalAnalyzer {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::DocumentAnalysis
    }

    async fn initialize(&self) -> Result<(), IntegrationError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse, IntegrationError> {
        match request {
            CapabilityRequest::AnalyzeDocument { text, .. } => {
                self.analyze(&text).map(CapabilityResponse::Analysis)
            }
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}

// ─── InMemorySearchIndex ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct IndexedDocument {
    source: Option<String>,
    content: String,
    tokens: Vec<String>,
}

/// Term-overlap search over documents added at runtime.
///
/// A hit's score is the fraction of distinct query terms it contains.
/// Supported filters: `min_score` (number) and `source` (exact string).
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    ready: AtomicBool,
    documents: RwLock<Vec<IndexedDocument>>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = Self::new();
        for doc in documents {
            index.add_document(None, doc);
        }
        index
    }

    pub fn add_document(&self, source: Option<String>, content: impl Into<String>) {
        let content = content.into();
        let tokens = content_tokens(&content);
        let mut docs = self.documents.write().unwrap_or_else(|p| p.into_inner());
        docs.push(IndexedDocument {
            source,
            content,
            tokens,
        });
    }

    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn search(
        &self,
        query: &str,
        filters: Option<&serde_json::Value>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, IntegrationError> {
        require_text(CapabilityKind::Search, query)?;

        let mut terms = content_tokens(query);
        let mut seen = std::collections::HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let min_score = filters
            .and_then(|f| f.get("min_score"))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as f32;
        let source = filters
            .and_then(|f| f.get("source"))
            .and_then(|v| v.as_str());

        let docs = self.documents.read().unwrap_or_else(|p| p.into_inner());
        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter(|d| source.is_none() || d.source.as_deref() == source)
            .filter_map(|d| {
                let matched = terms.iter().filter(|t| d.tokens.contains(t)).count();
                let score = matched as f32 / terms.len() as f32;
                (matched > 0 && score >= min_score).then(|| SearchHit {
                    content: d.content.clone(),
                    score,
                    source: d.source.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl Capability for InMemorySearchIndex {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Search
    }

    async fn initialize(&self) -> Result<(), IntegrationError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse, IntegrationError> {
        match request {
            CapabilityRequest::Search {
                query,
                filters,
                limit,
            } => self
                .search(&query, filters.as_ref(), limit)
                .map(CapabilityResponse::SearchResults),
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}

// ─── ExtractiveQa ───────────────────────────────────────────────────────────

pub const NO_ANSWER: &str = "No answer found in the provided context.";

/// Answers with the context sentence that shares the most terms with the question.
#[derive(Debug, Default)]
pub struct ExtractiveQa {
    ready: AtomicBool,
}

impl ExtractiveQa {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, question: &str, context: Option<&str>) -> Result<Answer, IntegrationError> {
        require_text(CapabilityKind::QuestionAnswering, question)?;
        let context = context
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| IntegrationError::failed(CapabilityKind::QuestionAnswering, "no context supplied"))?;

        let terms = content_tokens(question);
        if terms.is_empty() {
            return Ok(no_answer());
        }

        let mut best: Option<(&str, usize)> = None;
        for sentence in sentences(context) {
            let tokens = content_tokens(sentence);
            let overlap = terms.iter().filter(|t| tokens.contains(t)).count();
            if overlap > 0 && best.map_or(true, |(_, b)| overlap > b) {
                best = Some((sentence, overlap));
            }
        }

        Ok(match best {
            Some((sentence, overlap)) => Answer {
                answer: sentence.to_string(),
                confidence: (overlap as f32 / terms.len() as f32 * 0.9).min(0.9),
                sources: Vec::new(),
            },
            None => no_answer(),
        })
    }
}

fn no_answer() -> Answer {
    Answer {
        answer: NO_ANSWER.to_string(),
        confidence: 0.0,
        sources: Vec::new(),
    }
}

#[async_trait]
impl Capability for ExtractiveQa {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::QuestionAnswering
    }

    async fn initialize(&self) -> Result<(), IntegrationError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse, IntegrationError> {
        match request {
            CapabilityRequest::AnswerQuestion { question, context } => self
                .answer(&question, context.as_deref())
                .map(CapabilityResponse::Answer),
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}

// ─── OutlineExtractor ───────────────────────────────────────────────────────

/// Markdown-style headings become sections; topics come from headings or keywords.
#[derive(Debug, Default)]
pub struct OutlineExtractor {
    ready: AtomicBool,
}

impl OutlineExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract(&self, text: &str) -> Result<DocumentStructure, IntegrationError> {
        require_text(CapabilityKind::StructureExtraction, text)?;

        let sections: Vec<Section> = text
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with('#'))
            .filter_map(|l| {
                let level = l.chars().take_while(|c| *c == '#').count();
                let title = l[level..].trim();
                (!title.is_empty()).then(|| Section {
                    title: title.to_string(),
                    level: level.min(6) as u8,
                })
            })
            .collect();

        let title = sections
            .iter()
            .find(|s| s.level == 1)
            .map(|s| s.title.clone());

        let topics = if sections.iter().any(|s| s.level > 1) {
            sections
                .iter()
                .filter(|s| s.level > 1)
                .take(MAX_TOPICS)
                .map(|s| s.title.to_lowercase())
                .collect()
        } else {
            top_keywords(text, MAX_TOPICS)
        };

        Ok(DocumentStructure {
            title,
            sections,
            topics,
        })
    }
}

#[async_trait]
impl Capability for OutlineExtractor {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::StructureExtraction
    }

    async fn initialize(&self) -> Result<(), IntegrationError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse, IntegrationError> {
        match request {
            CapabilityRequest::ExtractStructure { text } => {
                self.extract(&text).map(CapabilityResponse::Structure)
            }
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "The migration was a great success. The rollout was led by Alice Moreno \
        and the new cache is efficient. Contact ops@example.com about the rollout plan.";

    #[test]
    fn analyzer_extracts_all_fields() {
        let a = LexicalAnalyzer::new().analyze(REPORT).unwrap();
        assert_eq!(
            a.summary,
            "The migration was a great success. The rollout was led by Alice Moreno and the new cache is efficient."
        );
        assert_eq!(a.sentiment.label, "positive");
        assert_eq!(a.sentiment.score, 1.0);
        assert_eq!(a.keywords[0], "rollout");
        let names: Vec<_> = a.entities.iter().map(|e| e.text.as_str()).collect();
        assert!(names.contains(&"Alice"));
        assert!(!names.contains(&"Contact"));
        assert!(names.contains(&"Moreno"));
        assert!(names.contains(&"ops@example.com"));
        assert!(!names.contains(&"The"));
    }

    #[test]
    fn analyzer_rejects_empty_text() {
        let err = LexicalAnalyzer::new().analyze("   ").unwrap_err();
        assert!(matches!(err, IntegrationError::CapabilityFailed { .. }));
    }

    #[test]
    fn neutral_when_no_sentiment_words() {
        let s = sentiment_of("The file has four columns.");
        assert_eq!(s.label, "neutral");
        assert_eq!(s.score, 0.5);
    }

    #[test]
    fn search_ranks_by_term_coverage() {
        let index = InMemorySearchIndex::with_documents([
            "Tokio is an async runtime for Rust.",
            "Rust has a strong type system.",
            "Gardening tips for spring.",
        ]);
        let hits = index.search("async rust runtime", None, 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "Tokio is an async runtime for Rust.");
        assert_eq!(hits[0].score, 1.0);
        assert!((hits[1].score - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn search_honours_min_score_and_limit() {
        let index = InMemorySearchIndex::with_documents(["alpha beta", "alpha", "beta gamma"]);
        let filters = serde_json::json!({ "min_score": 0.9 });
        let hits = index.search("alpha beta", Some(&filters), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "alpha beta");

        let limited = index.search("alpha beta", None, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn qa_picks_best_sentence() {
        let qa = ExtractiveQa::new();
        let context = "Paris is the capital of France. Berlin is the capital of Germany.";
        let answer = qa.answer("What is the capital of Germany?", Some(context)).unwrap();
        assert_eq!(answer.answer, "Berlin is the capital of Germany.");
        assert!(answer.confidence > 0.8);
    }

    #[test]
    fn qa_without_overlap_returns_no_answer() {
        let qa = ExtractiveQa::new();
        let answer = qa.answer("Who painted this?", Some("The sky is blue.")).unwrap();
        assert_eq!(answer.answer, NO_ANSWER);
        assert_eq!(answer.confidence, 0.0);
        assert!(qa.answer("Who?", None).is_err());
    }

    #[test]
    fn outline_uses_headings_for_topics() {
        let doc = "# Quarterly Report\n## Revenue\ntext\n## Hiring Plan\nmore text";
        let s = OutlineExtractor::new().extract(doc).unwrap();
        assert_eq!(s.title.as_deref(), Some("Quarterly Report"));
        assert_eq!(s.sections.len(), 3);
        assert_eq!(s.topics, vec!["revenue", "hiring plan"]);
    }

    #[test]
    fn outline_falls_back_to_keywords() {
        let s = OutlineExtractor::new()
            .extract("Budget review. The budget grew while hiring slowed.")
            .unwrap();
        assert!(s.sections.is_empty());
        assert_eq!(s.topics[0], "budget");
    }

    #[tokio::test]
    async fn capabilities_are_unavailable_until_initialized() {
        let qa = ExtractiveQa::new();
        assert!(!qa.is_available());
        qa.initialize().await.unwrap();
        assert!(qa.is_available());
    }

    #[tokio::test]
    async fn wrong_request_is_unsupported() {
        let analyzer = LexicalAnalyzer::new();
        let err = analyzer
            .invoke(CapabilityRequest::search("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntegrationError::UnsupportedRequest { request: "search", .. }
        ));
    }
}
