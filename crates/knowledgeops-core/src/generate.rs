//! Answer generation with an extractive fallback.
//!
//! The [`Generator`] has two terminal paths per request:
//!
//! - **Primary**: one call to the configured [`ChatBackend`] with the
//!   system message, trailing history, then the user prompt.
//! - **Fallback**: taken when no backend is configured or the single
//!   attempt fails. Builds an answer from the retrieved passages alone;
//!   deterministic and infallible.
//!
//! A failed primary attempt is never retried within the same request.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::assemble::{preview, AssembledContext};
use crate::backend::{Backend, BackendError};
use crate::models::{RetrievalResult, Role};

/// Model identifier reported when the fallback produced the answer.
pub const FALLBACK_MODEL: &str = "fallback";

const FALLBACK_MAX_SOURCES: usize = 3;
const FALLBACK_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A language-model completion endpoint.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Identifier reported in query results, e.g. `"groq/llama3-70b-8192"`.
    fn model_id(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationPath {
    Primary,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub answer: String,
    pub model: String,
    /// Always true: the fallback guarantees an answer.
    pub success: bool,
    pub path: GenerationPath,
    /// Why the primary path was abandoned, if it was attempted.
    pub error: Option<String>,
}

pub struct Generator {
    backend: Backend<Arc<dyn ChatBackend>>,
    settings: GenerationSettings,
}

impl Generator {
    pub fn new(backend: Backend<Arc<dyn ChatBackend>>, settings: GenerationSettings) -> Self {
        Self { backend, settings }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_configured()
    }

    /// Model id of the configured backend, or [`FALLBACK_MODEL`].
    pub fn model_id(&self) -> &str {
        match &self.backend {
            Backend::Configured(b) => b.model_id(),
            Backend::Unconfigured => FALLBACK_MODEL,
        }
    }

    pub async fn generate(
        &self,
        context: &AssembledContext,
        sources: &[RetrievalResult],
    ) -> Generation {
        let backend = match &self.backend {
            Backend::Configured(b) => b,
            Backend::Unconfigured => return fallback(context, sources, None),
        };

        let messages = build_messages(context);
        match backend
            .complete(&messages, self.settings.max_tokens, self.settings.temperature)
            .await
            .and_then(non_empty)
        {
            Ok(answer) => Generation {
                answer,
                model: backend.model_id().to_string(),
                success: true,
                path: GenerationPath::Primary,
                error: None,
            },
            Err(e) => {
                tracing::warn!(model = backend.model_id(), "generation failed, using fallback: {}", e);
                fallback(context, sources, Some(e.to_string()))
            }
        }
    }
}

fn non_empty(text: String) -> Result<String, BackendError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(BackendError::InvalidResponse("empty completion".to_string()))
    } else {
        Ok(trimmed.to_string())
    }
}

/// System message, then the history window, then the user prompt.
pub fn build_messages(context: &AssembledContext) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(context.history.len() + 2);
    messages.push(ChatMessage::new(Role::System, context.system_context.clone()));
    messages.extend(
        context
            .history
            .iter()
            .map(|t| ChatMessage::new(t.role, t.content.clone())),
    );
    messages.push(ChatMessage::new(Role::User, context.user_prompt.clone()));
    messages
}

/// Deterministic answer built only from retrieved passages.
pub fn fallback_answer(query: &str, sources: &[RetrievalResult]) -> String {
    if sources.is_empty() {
        return format!(
            "No relevant information found for: {} (generation backend not available)",
            query
        );
    }

    let mut answer = format!("Found {} relevant documents for: {}\n\n", sources.len(), query);
    for (i, source) in sources.iter().take(FALLBACK_MAX_SOURCES).enumerate() {
        answer.push_str(&format!(
            "{}. {}\n",
            i + 1,
            preview(&source.content, FALLBACK_PREVIEW_CHARS)
        ));
    }
    answer.trim_end().to_string()
}

fn fallback(
    context: &AssembledContext,
    sources: &[RetrievalResult],
    error: Option<String>,
) -> Generation {
    Generation {
        answer: fallback_answer(&context.query, sources),
        model: FALLBACK_MODEL.to_string(),
        success: true,
        path: GenerationPath::Fallback,
        error,
    }
}
