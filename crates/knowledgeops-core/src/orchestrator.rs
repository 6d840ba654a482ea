//! Query orchestration: validate → retrieve → assemble → generate.
//!
//! [`QueryOrchestrator`] is stateless between requests; everything it
//! holds is shared, read-mostly, and injected at construction.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assemble::{assemble, AssemblyLimits};
use crate::generate::Generator;
use crate::models::{ConversationTurn, QueryResult, RetrievalResult};
use crate::retrieve::Retriever;

const ACKNOWLEDGEMENT_PREFIX: &str = "Based on our conversation, ";
const ANAPHORIC_CUES: &[&str] = &["it", "that", "this", "more", "explain", "detail"];
const ACKNOWLEDGING_TERMS: &[&str] = &["previous", "context"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("question must not be empty")]
    EmptyQuestion,
}

/// Passages retrieved when neither the request nor the orchestrator sets a limit.
pub const DEFAULT_MAX_RESULTS: usize = 5;

fn default_use_rag() -> bool {
    true
}
fn default_session_id() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// `None` takes the orchestrator's default.
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
    #[serde(default)]
    pub context: Vec<ConversationTurn>,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            max_results: None,
            use_rag: default_use_rag(),
            context: Vec::new(),
            session_id: default_session_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    pub sources_found: usize,
    pub processing_time_ms: u64,
    pub rag_enabled: bool,
    pub context_used: bool,
    pub session_id: String,
    /// The answer was prefixed to acknowledge the conversation.
    pub context_aware: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    #[serde(flatten)]
    pub result: QueryResult,
    /// Mean source score; 0 without sources.
    pub confidence: f32,
    pub metadata: QueryMetadata,
}

pub struct QueryOrchestrator {
    retriever: Arc<Retriever>,
    generator: Arc<Generator>,
    limits: AssemblyLimits,
    default_max_results: usize,
}

impl QueryOrchestrator {
    pub fn new(retriever: Arc<Retriever>, generator: Arc<Generator>, limits: AssemblyLimits) -> Self {
        Self {
            retriever,
            generator,
            limits,
            default_max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Limit used for requests that leave `max_results` unset.
    pub fn with_default_max_results(mut self, max_results: usize) -> Self {
        self.default_max_results = max_results;
        self
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    /// Answer one question.
    ///
    /// # Errors
    ///
    /// [`QueryError::EmptyQuestion`] for an empty or whitespace question.
    /// Backend failures never surface here; they show up as a fallback
    /// answer with `result.error` set.
    pub async fn answer(&self, request: &QueryRequest) -> Result<QueryOutcome, QueryError> {
        let started = Instant::now();
        let question = request.question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let sources = if request.use_rag {
            self.retriever
                .search_similar(
                    question,
                    request.max_results.unwrap_or(self.default_max_results),
                )
                .await
        } else {
            Vec::new()
        };

        let assembled = assemble(question, &sources, &request.context, self.limits);
        let generation = self.generator.generate(&assembled, &sources).await;

        let context_used = !assembled.history.is_empty();
        let (answer, context_aware) =
            acknowledge_conversation(question, generation.answer, context_used);

        tracing::info!(
            session = %request.session_id,
            sources = sources.len(),
            model = %generation.model,
            path = ?generation.path,
            "answered query"
        );

        let confidence = mean_score(&sources);
        let metadata = QueryMetadata {
            sources_found: sources.len(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            rag_enabled: request.use_rag,
            context_used,
            session_id: request.session_id.clone(),
            context_aware,
        };

        Ok(QueryOutcome {
            result: QueryResult {
                answer,
                rag_used: !sources.is_empty(),
                usage: Some(serde_json::json!({
                    "generation_path": generation.path,
                    "history_turns": assembled.history.len(),
                })),
                sources,
                success: generation.success,
                model: generation.model,
                error: generation.error,
            },
            confidence,
            metadata,
        })
    }
}

fn mean_score(sources: &[RetrievalResult]) -> f32 {
    if sources.is_empty() {
        return 0.0;
    }
    sources.iter().map(|s| s.score).sum::<f32>() / sources.len() as f32
}

/// Best-effort back-reference for follow-up questions.
///
/// When the caller supplied history, the answer does not already mention
/// the conversation, and the question contains an anaphoric cue word
/// ("it", "that", "more", ...), prefix the answer with
/// `"Based on our conversation, "`. Cues match whole words only, case
/// insensitively. This is a keyword heuristic with known false
/// positives and negatives; nothing depends on it for correctness.
///
/// Returns the (possibly prefixed) answer and whether the prefix was added.
pub fn acknowledge_conversation(question: &str, answer: String, has_history: bool) -> (String, bool) {
    if !has_history {
        return (answer, false);
    }
    let answer_lower = answer.to_lowercase();
    if ACKNOWLEDGING_TERMS.iter().any(|t| answer_lower.contains(t)) {
        return (answer, false);
    }
    let question_lower = question.to_lowercase();
    let has_cue = question_lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| ANAPHORIC_CUES.contains(&word));
    if !has_cue {
        return (answer, false);
    }
    (format!("{}{}", ACKNOWLEDGEMENT_PREFIX, answer), true)
}
