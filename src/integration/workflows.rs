//! Built-in workflows over the capability set.
//!
//! - `document_analysis`: validate → analyze → extract_topics → assemble,
//!   with `report_error` as the graph-wide error handler
//! - `question_answering`: retrieve → answer (or no_answer when nothing was retrieved)
//! - `chunked_summary`: a compiled chunk → aggregate pass, reused twice

use serde_json::{json, Value};

use crate::workflow::{
    node_fn, CompiledWorkflow, EdgeCondition, NodeError, StatePatch, WorkflowBuilder,
    WorkflowError, WorkflowState,
};

use super::builtin::sentences;
use super::capability::{CapabilityKind, CapabilitySet};

pub const DOCUMENT_ANALYSIS: &str = "document_analysis";
pub const QUESTION_ANSWERING: &str = "question_answering";
pub const CHUNKED_SUMMARY: &str = "chunked_summary";

/// Key holding a workflow's final result.
pub const OUTPUT_KEY: &str = "output";

/// Key the caller seeds with the document text (falls back to `input`).
pub const DOCUMENT_KEY: &str = "document_content";

const MAX_TOPICS: usize = 5;
const RETRIEVE_LIMIT: usize = 3;
const CHUNK_SENTENCES: usize = 3;
/// A first-pass summary longer than this gets a second pass.
const MAX_SUMMARY_WORDS: usize = 40;

/// All built-in workflows, compiled against `caps`.
pub fn builtin_workflows(caps: &CapabilitySet) -> Result<Vec<CompiledWorkflow>, WorkflowError> {
    Ok(vec![
        document_analysis(caps)?,
        question_answering(caps)?,
        chunked_summary()?,
    ])
}

// ─── document_analysis ──────────────────────────────────────────────────────

pub fn document_analysis(caps: &CapabilitySet) -> Result<CompiledWorkflow, WorkflowError> {
    let validate = node_fn(|state: WorkflowState| async move {
        let text = state.text_or_input(DOCUMENT_KEY).trim().to_string();
        if text.is_empty() {
            return Err(NodeError::new("document is empty"));
        }
        Ok(StatePatch::new().set("document", text).with_confidence(1.0))
    });

    let analyze_caps = caps.clone();
    let analyze = node_fn(move |state| analyze_step(analyze_caps.clone(), state));

    let topic_caps = caps.clone();
    let extract_topics = node_fn(move |state: WorkflowState| {
        let caps = topic_caps.clone();
        async move {
            let document = state.get_str("document").unwrap_or_default();
            let mut structured = None;
            if caps.is_available(CapabilityKind::StructureExtraction) {
                match caps.extract_structure(document).await {
                    Ok(s) if !s.topics.is_empty() => structured = Some(s.topics),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "workflow: structure extraction failed, using keywords"),
                }
            }

            let (topics, source, confidence) = match structured {
                Some(topics) => (topics, "structure", 0.85),
                None => (analysis_keywords(&state), "keywords", 0.6),
            };
            Ok(StatePatch::new()
                .set("topics", topics)
                .set("topics_source", source)
                .with_confidence(confidence))
        }
    });

    let assemble = node_fn(|state: WorkflowState| async move {
        let analysis = state.get("analysis").cloned().unwrap_or(Value::Null);
        let field = |key: &str| analysis.get(key).cloned().unwrap_or(Value::Null);
        let output = json!({
            "summary": field("summary"),
            "sentiment": field("sentiment"),
            "keywords": field("keywords"),
            "entities": field("entities"),
            "topics": state.get("topics").cloned().unwrap_or_else(|| json!([])),
        });

        let scores: Vec<f32> = ["analyze", "extract_topics"]
            .iter()
            .filter_map(|n| state.confidence(n))
            .collect();
        let confidence = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        };
        Ok(StatePatch::new().set(OUTPUT_KEY, output).with_confidence(confidence))
    });

    let report_error = node_fn(|state: WorkflowState| async move {
        let reason = state.error.as_deref().unwrap_or("unknown error");
        Ok(StatePatch::new()
            .set("report", format!("Document analysis failed: {reason}"))
            .with_confidence(0.0))
    });

    WorkflowBuilder::new(DOCUMENT_ANALYSIS)
        .add_node_with_outputs("validate", validate, ["document"])
        .add_node_with_outputs("analyze", analyze, ["analysis"])
        .add_node_with_outputs("extract_topics", extract_topics, ["topics", "topics_source"])
        .add_node_with_outputs("assemble", assemble, [OUTPUT_KEY])
        .add_node_with_outputs("report_error", report_error, ["report"])
        .set_entry("validate")
        .add_edge("validate", "analyze")
        .add_edge("analyze", "extract_topics")
        .add_edge("extract_topics", "assemble")
        .set_error_handler("report_error")
        .compile()
}

async fn analyze_step(caps: CapabilitySet, state: WorkflowState) -> Result<StatePatch, NodeError> {
    let document = state.get_str("document").unwrap_or_default();
    let analysis = caps.analyze_document(document, None).await?;
    let confidence = if analysis.keywords.is_empty() { 0.5 } else { 0.9 };
    Ok(StatePatch::new()
        .set("analysis", serde_json::to_value(&analysis)?)
        .with_confidence(confidence))
}

fn analysis_keywords(state: &WorkflowState) -> Vec<String> {
    state
        .get("analysis")
        .and_then(|a| a.get("keywords"))
        .and_then(Value::as_array)
        .map(|keywords| {
            keywords
                .iter()
                .filter_map(Value::as_str)
                .take(MAX_TOPICS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ─── question_answering ─────────────────────────────────────────────────────

/// Answer `question` (or `input`) from a seeded `context`, else from search results.
pub fn question_answering(caps: &CapabilitySet) -> Result<CompiledWorkflow, WorkflowError> {
    let retrieve_caps = caps.clone();
    let retrieve = node_fn(move |state| retrieve_step(retrieve_caps.clone(), state));

    let answer_caps = caps.clone();
    let answer = node_fn(move |state| answer_step(answer_caps.clone(), state));

    let no_answer = node_fn(|_state: WorkflowState| async move {
        Ok(StatePatch::new()
            .set(
                "answer",
                json!({
                    "answer": "I could not find any material to answer that question.",
                    "confidence": 0.0,
                }),
            )
            .with_confidence(0.0))
    });

    WorkflowBuilder::new(QUESTION_ANSWERING)
        .add_node_with_outputs("retrieve", retrieve, ["question", "passages"])
        .add_node_with_outputs("answer", answer, ["answer"])
        .add_node_with_outputs("no_answer", no_answer, ["answer"])
        .set_entry("retrieve")
        .add_conditional_edge("retrieve", "answer", EdgeCondition::KeyTruthy("passages".into()))
        .add_edge("retrieve", "no_answer")
        .compile()
}

async fn retrieve_step(caps: CapabilitySet, state: WorkflowState) -> Result<StatePatch, NodeError> {
    let question = state.text_or_input("question").to_string();
    let provided = state
        .get_str("context")
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string);

    let (passages, confidence) = match provided {
        Some(context) => (vec![context], 1.0),
        None if caps.is_available(CapabilityKind::Search) => {
            let hits = caps.search(&question, None, RETRIEVE_LIMIT).await?;
            let top = hits.first().map_or(0.0, |h| h.score);
            (hits.into_iter().map(|h| h.content).collect(), top)
        }
        None => {
            tracing::warn!("workflow: no context and search unavailable");
            (Vec::new(), 0.0)
        }
    };
    Ok(StatePatch::new()
        .set("question", question)
        .set("passages", passages)
        .with_confidence(confidence))
}

async fn answer_step(caps: CapabilitySet, state: WorkflowState) -> Result<StatePatch, NodeError> {
    let question = state.text_or_input("question");
    let context = state
        .get("passages")
        .and_then(Value::as_array)
        .map(|p| {
            p.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    let answer = caps.answer_question(question, Some(context)).await?;
    let confidence = answer.confidence;
    Ok(StatePatch::new()
        .set("answer", serde_json::to_value(&answer)?)
        .with_confidence(confidence))
}

// ─── chunked_summary ────────────────────────────────────────────────────────

/// One summarization pass: split into sentence chunks, keep each chunk's lead sentence.
pub fn summarize_pass() -> Result<CompiledWorkflow, WorkflowError> {
    let chunk = node_fn(|state: WorkflowState| async move {
        let text = state
            .get_str("summary")
            .unwrap_or_else(|| state.text_or_input(DOCUMENT_KEY));
        let chunks: Vec<String> = sentences(text)
            .chunks(CHUNK_SENTENCES)
            .map(|c| c.join(" "))
            .collect();
        if chunks.is_empty() {
            return Err(NodeError::new("nothing to summarize"));
        }
        Ok(StatePatch::new().set("chunks", chunks))
    });

    let aggregate = node_fn(aggregate_step);

    WorkflowBuilder::new("summarize_pass")
        .add_node_with_outputs("chunk", chunk, ["chunks"])
        .add_node_with_outputs("aggregate", aggregate, ["summary", "passes"])
        .set_entry("chunk")
        .add_edge("chunk", "aggregate")
        .compile()
}

async fn aggregate_step(state: WorkflowState) -> Result<StatePatch, NodeError> {
    let chunks = state
        .get("chunks")
        .and_then(Value::as_array)
        .ok_or_else(|| NodeError::new("missing chunks"))?;
    let leads: Vec<&str> = chunks
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|c| sentences(c).into_iter().next())
        .collect();
    let passes = state.get("passes").and_then(Value::as_u64).unwrap_or(0) + 1;
    let ratio = leads.len() as f32 / chunks.len().max(1) as f32;
    Ok(StatePatch::new()
        .set("summary", leads.join(" "))
        .set("passes", passes)
        .with_confidence(ratio))
}

pub fn chunked_summary() -> Result<CompiledWorkflow, WorkflowError> {
    let pass = summarize_pass()?;

    let finalize = node_fn(|state: WorkflowState| async move {
        let output = json!({
            "summary": state.get("summary").cloned().unwrap_or(Value::Null),
            "passes": state.get("passes").cloned().unwrap_or(Value::Null),
        });
        Ok(StatePatch::new().set(OUTPUT_KEY, output).with_confidence(1.0))
    });

    let too_long = |state: &WorkflowState| {
        state
            .get_str("summary")
            .is_some_and(|s| s.split_whitespace().count() > MAX_SUMMARY_WORDS)
    };

    WorkflowBuilder::new(CHUNKED_SUMMARY)
        .add_subgraph("first_pass", &pass)
        .add_subgraph("second_pass", &pass)
        .add_node_with_outputs("finalize", finalize, [OUTPUT_KEY])
        .set_entry("first_pass")
        .add_conditional_edge("first_pass", "second_pass", EdgeCondition::custom(too_long))
        .add_edge("first_pass", "finalize")
        .add_edge("second_pass", "finalize")
        .compile()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::integration::builtin::{
        ExtractiveQa, InMemorySearchIndex, LexicalAnalyzer, OutlineExtractor,
    };
    use crate::integration::capability::Capability;
    use crate::workflow::{RunOptions, WorkflowEngine};

    async fn ready_caps(with_structure: bool) -> CapabilitySet {
        let mut caps: Vec<Arc<dyn Capability>> = vec![
            Arc::new(LexicalAnalyzer::new()),
            Arc::new(InMemorySearchIndex::with_documents([
                "The Rust borrow checker enforces ownership rules at compile time.",
                "Tokio schedules async tasks on a work-stealing runtime.",
            ])),
            Arc::new(ExtractiveQa::new()),
        ];
        if with_structure {
            caps.push(Arc::new(OutlineExtractor::new()));
        }
        let set = CapabilitySet::new(caps, Duration::from_secs(5));
        assert!(set.initialize_all().await.is_empty());
        set
    }

    const DOCUMENT: &str = "# Release Notes\n## Performance\nThe new cache is a great success. \
        Latency improved for every Rust service.\n## Migration\nTeams should review the rollout plan.";

    #[tokio::test]
    async fn document_analysis_output_has_exact_keys() {
        let caps = ready_caps(true).await;
        let wf = document_analysis(&caps).unwrap();
        let run = WorkflowEngine::default()
            .run(&wf, "analyze this", RunOptions::default().with_value(DOCUMENT_KEY, DOCUMENT))
            .await
            .unwrap();

        let output = run.state.get(OUTPUT_KEY).unwrap().as_object().unwrap();
        let mut keys: Vec<_> = output.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["entities", "keywords", "sentiment", "summary", "topics"]);
        assert_eq!(output["topics"], json!(["performance", "migration"]));
        assert_eq!(output["sentiment"]["label"], "positive");
        assert_eq!(
            run.state.steps_completed(),
            ["validate", "analyze", "extract_topics", "assemble"]
        );
    }

    #[tokio::test]
    async fn document_analysis_falls_back_to_keywords_without_structure() {
        let caps = ready_caps(false).await;
        let wf = document_analysis(&caps).unwrap();
        let run = WorkflowEngine::default()
            .run(&wf, "Budget review. The budget grew while hiring slowed.", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(run.state.get_str("topics_source"), Some("keywords"));
        assert_eq!(run.state.get(OUTPUT_KEY).unwrap()["topics"][0], "budget");
    }

    #[tokio::test]
    async fn empty_document_is_reported_by_handler() {
        let caps = ready_caps(true).await;
        let wf = document_analysis(&caps).unwrap();
        let run = WorkflowEngine::default()
            .run(&wf, "   ", RunOptions::default())
            .await
            .unwrap();
        assert!(run.state.get(OUTPUT_KEY).is_none());
        assert_eq!(run.state.steps_completed(), ["report_error"]);
        assert!(run
            .state
            .get_str("report")
            .unwrap()
            .contains("document is empty"));
    }

    #[tokio::test]
    async fn question_answering_uses_search() {
        let caps = ready_caps(false).await;
        let wf = question_answering(&caps).unwrap();
        let run = WorkflowEngine::default()
            .run(&wf, "What does the borrow checker enforce?", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(run.state.steps_completed(), ["retrieve", "answer"]);
        assert_eq!(
            run.state.get("answer").unwrap()["answer"],
            "The Rust borrow checker enforces ownership rules at compile time."
        );
    }

    #[tokio::test]
    async fn question_answering_without_material_takes_no_answer_branch() {
        let caps = ready_caps(false).await;
        let wf = question_answering(&caps).unwrap();
        let run = WorkflowEngine::default()
            .run(&wf, "Which gardening tools exist?", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(run.state.steps_completed(), ["retrieve", "no_answer"]);
        assert_eq!(run.state.get("answer").unwrap()["confidence"], 0.0);
    }

    #[tokio::test]
    async fn chunked_summary_runs_second_pass_only_when_needed() {
        let long: String = (0..30)
            .map(|i| format!("Sentence number {i} talks about topic {i}."))
            .collect::<Vec<_>>()
            .join(" ");
        let wf = chunked_summary().unwrap();
        let run = WorkflowEngine::default()
            .run(&wf, long, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(
            run.state.steps_completed(),
            [
                "first_pass/chunk",
                "first_pass/aggregate",
                "second_pass/chunk",
                "second_pass/aggregate",
                "finalize"
            ]
        );
        assert_eq!(run.state.get(OUTPUT_KEY).unwrap()["passes"], 2);

        let run = WorkflowEngine::default()
            .run(&wf, "One short line. Another one.", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(
            run.state.steps_completed(),
            ["first_pass/chunk", "first_pass/aggregate", "finalize"]
        );
        assert_eq!(run.state.get(OUTPUT_KEY).unwrap()["summary"], "One short line.");
    }
}
