//! Input classifier — maps free text to a [`TaskClassification`].
//!
//! Two passes:
//! 1. **Casual filter** — short greetings, thanks and small talk in English,
//!    Spanish or French are flagged `is_casual` and never reach the router.
//! 2. **Keyword-group scoring** — each task type owns a list of synonym groups;
//!    a group matches when any of its terms appears in the input. The type with
//!    the most matched groups wins (table order breaks ties). When the winning
//!    confidence is below `disambiguation_threshold`, an optional
//!    [`Disambiguator`] gets a chance to pick among the near-tied candidates.

use std::sync::Arc;

use crate::config::ClassifierConfig;

use super::types::{Priority, TaskClassification, TaskType};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Confidence before any keyword group matched.
const BASE_CONFIDENCE: f32 = 0.62;

/// Confidence added per matched keyword group.
const GROUP_WEIGHT: f32 = 0.12;

/// Confidence ceiling for keyword classification.
const MAX_CONFIDENCE: f32 = 0.98;

/// Penalty when the runner-up matched as many groups as the winner.
const AMBIGUITY_PENALTY: f32 = 0.10;

/// Confidence for non-empty input that matched no keyword group.
const NO_MATCH_CONFIDENCE: f32 = 0.3;

/// Keyword groups per task type. Order is the tie-break order.
///
/// Single-word terms of five or more characters also match as prefixes
/// (`refactor` matches `refactoring`); multi-word terms match as phrases.
const TASK_KEYWORDS: &[(TaskType, &[&[&str]])] = &[
    (
        TaskType::CodeRefactor,
        &[
            &["refactor", "restructure", "clean up", "simplify", "rewrite", "refactorizar", "refactoriser"],
            &["code", "function", "class", "method", "module", "codebase", "código", "codigo"],
        ],
    ),
    (
        TaskType::CodeReview,
        &[
            &["review", "audit", "critique", "revisar"],
            &["code", "pull request", "diff", "implementation", "function", "código", "codigo"],
        ],
    ),
    (
        TaskType::Debugging,
        &[
            &["debug", "bug", "error", "exception", "crash", "stack trace", "fix", "broken"],
            &["code", "function", "program", "test", "compile", "build"],
        ],
    ),
    (
        TaskType::CodeGeneration,
        &[
            &["write", "create", "generate", "implement", "build"],
            &["code", "function", "script", "program", "class", "endpoint", "api"],
        ],
    ),
    (
        TaskType::CreativeWriting,
        &[
            &["poem", "story", "poetry", "novel", "lyrics", "haiku", "essay", "slogan", "poema", "cuento"],
            &["write", "compose", "draft", "creative", "escribir", "écrire"],
        ],
    ),
    (
        TaskType::DocumentAnalysis,
        &[
            &["document", "report", "article", "pdf", "paper", "contract", "documento"],
            &["analyze", "analyse", "summarize", "summary", "sentiment", "extract", "entities", "key points", "resumir", "résumer"],
        ],
    ),
    (
        TaskType::FileProcessing,
        &[
            &["file", "files", "folder", "directory", "spreadsheet", "archivo", "fichier"],
            &["convert", "rename", "organize", "move", "compress", "merge", "split"],
        ],
    ),
    (
        TaskType::DataAnalysis,
        &[
            &["data", "dataset", "statistics", "metrics", "numbers", "csv"],
            &["analyze", "analyse", "trend", "chart", "plot", "average", "correlation"],
        ],
    ),
    (
        TaskType::Translation,
        &[
            &["translate", "translation", "traducir", "traduire"],
            &["english", "spanish", "french", "german", "language", "into"],
        ],
    ),
    (
        TaskType::Research,
        &[
            &["research", "investigate", "sources", "literature", "find information"],
            &["topic", "about", "latest", "compare", "papers"],
        ],
    ),
    (
        TaskType::QuestionAnswering,
        &[
            &["what", "who", "when", "where", "why", "how", "qué", "quién", "pourquoi"],
            &["question", "explain", "mean", "difference", "is", "are", "does"],
        ],
    ),
];

/// Casual phrases: (language, type, phrase).
const CASUAL_PHRASES: &[(&str, TaskType, &str)] = &[
    ("en", TaskType::CasualGreeting, "hi"),
    ("en", TaskType::CasualGreeting, "hello"),
    ("en", TaskType::CasualGreeting, "hey"),
    ("en", TaskType::CasualGreeting, "hiya"),
    ("en", TaskType::CasualGreeting, "howdy"),
    ("en", TaskType::CasualGreeting, "greetings"),
    ("en", TaskType::CasualGreeting, "good morning"),
    ("en", TaskType::CasualGreeting, "good afternoon"),
    ("en", TaskType::CasualGreeting, "good evening"),
    ("en", TaskType::CasualThanks, "thanks"),
    ("en", TaskType::CasualThanks, "thank you"),
    ("en", TaskType::CasualThanks, "thx"),
    ("en", TaskType::CasualThanks, "cheers"),
    ("en", TaskType::CasualThanks, "much appreciated"),
    ("en", TaskType::CasualThanks, "appreciate it"),
    ("en", TaskType::CasualSmallTalk, "how are you"),
    ("en", TaskType::CasualSmallTalk, "how are you doing"),
    ("en", TaskType::CasualSmallTalk, "how's it going"),
    ("en", TaskType::CasualSmallTalk, "what's up"),
    ("en", TaskType::CasualSmallTalk, "nice to meet you"),
    ("en", TaskType::CasualSmallTalk, "bye"),
    ("en", TaskType::CasualSmallTalk, "goodbye"),
    ("en", TaskType::CasualSmallTalk, "see you"),
    ("en", TaskType::CasualSmallTalk, "good night"),
    ("es", TaskType::CasualGreeting, "hola"),
    ("es", TaskType::CasualGreeting, "buenas"),
    ("es", TaskType::CasualGreeting, "buenos días"),
    ("es", TaskType::CasualGreeting, "buenos dias"),
    ("es", TaskType::CasualGreeting, "buenas tardes"),
    ("es", TaskType::CasualGreeting, "buenas noches"),
    ("es", TaskType::CasualThanks, "gracias"),
    ("es", TaskType::CasualThanks, "muchas gracias"),
    ("es", TaskType::CasualThanks, "mil gracias"),
    ("es", TaskType::CasualSmallTalk, "qué tal"),
    ("es", TaskType::CasualSmallTalk, "que tal"),
    ("es", TaskType::CasualSmallTalk, "cómo estás"),
    ("es", TaskType::CasualSmallTalk, "como estas"),
    ("es", TaskType::CasualSmallTalk, "adiós"),
    ("es", TaskType::CasualSmallTalk, "adios"),
    ("es", TaskType::CasualSmallTalk, "hasta luego"),
    ("fr", TaskType::CasualGreeting, "bonjour"),
    ("fr", TaskType::CasualGreeting, "bonsoir"),
    ("fr", TaskType::CasualGreeting, "salut"),
    ("fr", TaskType::CasualGreeting, "coucou"),
    ("fr", TaskType::CasualThanks, "merci"),
    ("fr", TaskType::CasualThanks, "merci beaucoup"),
    ("fr", TaskType::CasualSmallTalk, "ça va"),
    ("fr", TaskType::CasualSmallTalk, "ca va"),
    ("fr", TaskType::CasualSmallTalk, "comment ça va"),
    ("fr", TaskType::CasualSmallTalk, "au revoir"),
    ("fr", TaskType::CasualSmallTalk, "à bientôt"),
];

/// Words allowed around a casual phrase without making the message a task.
const CASUAL_FILLER: &[&str] = &[
    "there", "everyone", "all", "friend", "again", "so", "much", "very", "a", "lot", "for",
    "the", "your", "help", "bot", "assistant", "you", "today", "and", "oh", "ok", "okay",
    "amigo", "a", "todos", "tú", "tu", "por", "la", "ayuda", "tout", "le", "monde", "toi",
    "pour", "l", "aide", "mon", "ami",
];

const URGENT_MARKERS: &[&str] = &["urgent", "urgently", "asap", "immediately", "critical", "urgente"];

const SPANISH_MARKERS: &[&str] = &[
    "el", "los", "las", "por", "para", "qué", "cómo", "este", "esta", "código", "documento",
    "una", "con", "del",
];

const FRENCH_MARKERS: &[&str] = &[
    "le", "les", "des", "ce", "cette", "est", "pour", "avec", "une", "du", "je", "vous",
];

// ─── Disambiguation ─────────────────────────────────────────────────────────

/// A scored task type produced by the keyword pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub task_type: TaskType,
    pub matched_groups: usize,
    pub confidence: f32,
}

/// Secondary pass run when the primary confidence is below the threshold.
///
/// Returns the candidate to use instead, or `None` to keep the primary pick.
pub trait Disambiguator: Send + Sync {
    fn disambiguate(
        &self,
        text: &str,
        candidates: &[Candidate],
        context: Option<&serde_json::Value>,
    ) -> Option<Candidate>;
}

/// Breaks near-ties using the previous task type from the caller's context.
///
/// Reads `context.previous_task_type` (snake_case string). Only candidates
/// that matched as many groups as the best one are eligible.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextDisambiguator;

impl Disambiguator for ContextDisambiguator {
    fn disambiguate(
        &self,
        _text: &str,
        candidates: &[Candidate],
        context: Option<&serde_json::Value>,
    ) -> Option<Candidate> {
        let previous = context?.get("previous_task_type")?.as_str()?;
        let best_groups = candidates.first()?.matched_groups;

        candidates
            .iter()
            .filter(|c| c.matched_groups == best_groups)
            .find(|c| c.task_type.as_str() == previous)
            .map(|c| Candidate {
                task_type: c.task_type,
                matched_groups: c.matched_groups,
                confidence: group_confidence(c.matched_groups),
            })
    }
}

// ─── Classifier ─────────────────────────────────────────────────────────────

/// Stateless classifier; cheap to share behind an `Arc`.
#[derive(Clone)]
pub struct InputClassifier {
    config: ClassifierConfig,
    disambiguator: Option<Arc<dyn Disambiguator>>,
}

impl Default for InputClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl std::fmt::Debug for InputClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputClassifier")
            .field("config", &self.config)
            .field("has_disambiguator", &self.disambiguator.is_some())
            .finish()
    }
}

impl InputClassifier {
    /// Classifier with the [`ContextDisambiguator`] installed.
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            disambiguator: Some(Arc::new(ContextDisambiguator)),
        }
    }

    pub fn with_disambiguator(mut self, disambiguator: Arc<dyn Disambiguator>) -> Self {
        self.disambiguator = Some(disambiguator);
        self
    }

    pub fn without_disambiguator(mut self) -> Self {
        self.disambiguator = None;
        self
    }

    /// Classify one input. Never fails: empty input yields `unknown` at 0.0.
    pub fn classify(&self, text: &str, context: Option<&serde_json::Value>) -> TaskClassification {
        let tokens = tokenize(text);

        if tokens.is_empty() {
            tracing::debug!("classifier: empty input");
            return TaskClassification {
                task_type: TaskType::Unknown,
                confidence: 0.0,
                priority: Priority::Low,
                reasoning: "empty input".to_string(),
                is_casual: false,
                language: "en".to_string(),
            };
        }

        if let Some(casual) = self.detect_casual(&tokens) {
            tracing::debug!(task_type = %casual.task_type, language = %casual.language, "classifier: casual input");
            return casual;
        }

        let language = detect_language(&tokens).to_string();
        let priority = detect_priority(&tokens);
        let candidates = score_candidates(&tokens);

        let Some(best) = candidates.first().cloned() else {
            return TaskClassification {
                task_type: TaskType::Unknown,
                confidence: NO_MATCH_CONFIDENCE,
                priority,
                reasoning: "no task keywords matched".to_string(),
                is_casual: false,
                language,
            };
        };

        let mut chosen = best.clone();
        let mut disambiguated = false;
        if chosen.confidence < self.config.disambiguation_threshold {
            if let Some(d) = &self.disambiguator {
                if let Some(pick) = d.disambiguate(text, &candidates, context) {
                    disambiguated = pick.task_type != best.task_type || pick.confidence != best.confidence;
                    chosen = pick;
                }
            }
        }

        let total_groups = groups_for(chosen.task_type).len();
        let mut reasoning = format!(
            "matched {}/{} keyword groups for {}",
            chosen.matched_groups, total_groups, chosen.task_type
        );
        if disambiguated {
            reasoning.push_str("; disambiguated by context");
        }
        let secondary: Vec<String> = candidates
            .iter()
            .filter(|c| c.task_type != chosen.task_type)
            .map(|c| format!("{}({})", c.task_type, c.matched_groups))
            .collect();
        if !secondary.is_empty() {
            reasoning.push_str("; secondary intents: ");
            reasoning.push_str(&secondary.join(", "));
        }

        tracing::debug!(
            task_type = %chosen.task_type,
            confidence = chosen.confidence,
            "classifier: classified input"
        );

        TaskClassification {
            task_type: chosen.task_type,
            confidence: chosen.confidence.clamp(0.0, 1.0),
            priority,
            reasoning,
            is_casual: false,
            language,
        }
    }

    /// Recognize messages made only of casual phrases plus filler words.
    fn detect_casual(&self, tokens: &[String]) -> Option<TaskClassification> {
        if tokens.len() > self.config.max_casual_words {
            return None;
        }

        let mut consumed = vec![false; tokens.len()];
        let mut matches: Vec<(&str, TaskType)> = Vec::new();

        // Longest phrases first so "thank you" wins over a lone "you" filler.
        let mut phrases: Vec<(&str, TaskType, Vec<String>)> = CASUAL_PHRASES
            .iter()
            .map(|(lang, kind, phrase)| (*lang, *kind, tokenize(phrase)))
            .collect();
        phrases.sort_by(|a, b| b.2.len().cmp(&a.2.len()));

        for (lang, kind, phrase) in &phrases {
            let n = phrase.len();
            if n == 0 || n > tokens.len() {
                continue;
            }
            let mut i = 0;
            while i + n <= tokens.len() {
                let free = consumed[i..i + n].iter().all(|c| !c);
                if free && tokens[i..i + n] == phrase[..] {
                    consumed[i..i + n].iter_mut().for_each(|c| *c = true);
                    matches.push((lang, *kind));
                    i += n;
                } else {
                    i += 1;
                }
            }
        }

        if matches.is_empty() {
            return None;
        }

        let only_filler = tokens
            .iter()
            .zip(&consumed)
            .filter(|(_, used)| !**used)
            .all(|(t, _)| CASUAL_FILLER.contains(&t.as_str()));
        if !only_filler {
            return None;
        }

        let task_type = if matches.iter().any(|(_, k)| *k == TaskType::CasualThanks) {
            TaskType::CasualThanks
        } else if matches.iter().any(|(_, k)| *k == TaskType::CasualSmallTalk) {
            TaskType::CasualSmallTalk
        } else {
            TaskType::CasualGreeting
        };
        let language = matches[0].0.to_string();

        Some(TaskClassification {
            task_type,
            confidence: self.config.casual_confidence,
            priority: Priority::Low,
            reasoning: format!("casual {} input ({language})", casual_label(task_type)),
            is_casual: true,
            language,
        })
    }
}

// ─── Free Functions ─────────────────────────────────────────────────────────

/// Lowercase word tokens; anything that is not alphanumeric separates words.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether a keyword term appears in the token stream.
fn term_matches(tokens: &[String], padded: &str, term: &str) -> bool {
    let term_tokens = tokenize(term);
    match term_tokens.len() {
        0 => false,
        1 => {
            let t = &term_tokens[0];
            tokens
                .iter()
                .any(|tok| tok == t || (t.chars().count() >= 5 && tok.starts_with(t.as_str())))
        }
        _ => padded.contains(&format!(" {} ", term_tokens.join(" "))),
    }
}

fn groups_for(task_type: TaskType) -> &'static [&'static [&'static str]] {
    TASK_KEYWORDS
        .iter()
        .find(|(t, _)| *t == task_type)
        .map(|(_, groups)| *groups)
        .unwrap_or(&[])
}

fn group_confidence(matched_groups: usize) -> f32 {
    (BASE_CONFIDENCE + GROUP_WEIGHT * matched_groups as f32).min(MAX_CONFIDENCE)
}

/// Score every task type; returns matched candidates sorted best-first.
///
/// The sort is stable, so equal scores keep table order.
fn score_candidates(tokens: &[String]) -> Vec<Candidate> {
    let padded = format!(" {} ", tokens.join(" "));

    let mut candidates: Vec<Candidate> = TASK_KEYWORDS
        .iter()
        .filter_map(|(task_type, groups)| {
            let matched = groups
                .iter()
                .filter(|group| group.iter().any(|term| term_matches(tokens, &padded, term)))
                .count();
            (matched > 0).then(|| Candidate {
                task_type: *task_type,
                matched_groups: matched,
                confidence: group_confidence(matched),
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.matched_groups.cmp(&a.matched_groups));

    if candidates.len() > 1 && candidates[1].matched_groups == candidates[0].matched_groups {
        candidates[0].confidence = (candidates[0].confidence - AMBIGUITY_PENALTY).max(0.0);
    }

    candidates
}

fn detect_language(tokens: &[String]) -> &'static str {
    let count = |markers: &[&str]| tokens.iter().filter(|t| markers.contains(&t.as_str())).count();
    let es = count(SPANISH_MARKERS);
    let fr = count(FRENCH_MARKERS);
    if es > fr && es > 0 {
        "es"
    } else if fr > es && fr > 0 {
        "fr"
    } else {
        "en"
    }
}

fn detect_priority(tokens: &[String]) -> Priority {
    if tokens.iter().any(|t| URGENT_MARKERS.contains(&t.as_str())) {
        Priority::High
    } else {
        Priority::Normal
    }
}

fn casual_label(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::CasualThanks => "thanks",
        TaskType::CasualSmallTalk => "small-talk",
        _ => "greeting",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
