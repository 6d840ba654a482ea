//! Prompt assembly from retrieved passages and conversation history.
//!
//! Produces the system context (persona plus labelled passages) and the
//! user prompt (the question, restated against recent history when there
//! is any). Assembly is a pure function and cannot fail.

use crate::models::{ConversationTurn, RetrievalResult};

const BASE_SYSTEM_CONTEXT: &str =
    "You are a helpful AI assistant that answers questions about the documents in this knowledge base.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyLimits {
    /// Retrieved passages included in the system context.
    pub max_sources: usize,
    /// Most recent history turns carried into the prompt.
    pub max_history_turns: usize,
    /// Characters kept from each passage.
    pub preview_chars: usize,
}

impl Default for AssemblyLimits {
    fn default() -> Self {
        Self {
            max_sources: 3,
            max_history_turns: 6,
            preview_chars: 300,
        }
    }
}

/// Everything the generator needs for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    /// The question as asked, for fallback answers.
    pub query: String,
    pub system_context: String,
    pub user_prompt: String,
    /// The trailing history window, oldest first.
    pub history: Vec<ConversationTurn>,
}

/// Cut `text` to `max_chars` characters, marking the cut with `...`.
pub fn preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// The last `max_turns` non-empty turns, in their original order.
pub fn recent_history(history: &[ConversationTurn], max_turns: usize) -> Vec<ConversationTurn> {
    let skip = history.len().saturating_sub(max_turns);
    history[skip..]
        .iter()
        .filter(|t| !t.content.trim().is_empty())
        .cloned()
        .collect()
}

pub fn assemble(
    query: &str,
    results: &[RetrievalResult],
    history: &[ConversationTurn],
    limits: AssemblyLimits,
) -> AssembledContext {
    let passages: Vec<String> = results
        .iter()
        .take(limits.max_sources)
        .enumerate()
        .map(|(i, r)| format!("Document {}: {}", i + 1, preview(&r.content, limits.preview_chars)))
        .collect();

    let system_context = if passages.is_empty() {
        BASE_SYSTEM_CONTEXT.to_string()
    } else {
        format!(
            "{}\n\nRelevant documents from knowledge base:\n{}\n\nUse these documents to answer when relevant.",
            BASE_SYSTEM_CONTEXT,
            passages.join("\n\n")
        )
    };

    let history = recent_history(history, limits.max_history_turns);

    let user_prompt = if history.is_empty() {
        query.to_string()
    } else {
        let transcript: String = history
            .iter()
            .map(|t| format!("{}: {}\n", t.role.as_str(), t.content.trim()))
            .collect();
        format!(
            "Based on our previous conversation:\n{}\nCurrent question: {}\n\n\
             Please answer the current question considering the context of our conversation.",
            transcript, query
        )
    };

    AssembledContext {
        query: query.to_string(),
        system_context,
        user_prompt,
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, Role};

    fn result(content: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            content: content.to_string(),
            metadata: Metadata::new(),
            score,
        }
    }

    #[test]
    fn test_bare_query_when_nothing_to_add() {
        let ctx = assemble("What is Rust?", &[], &[], AssemblyLimits::default());
        assert_eq!(ctx.user_prompt, "What is Rust?");
        assert_eq!(ctx.system_context, BASE_SYSTEM_CONTEXT);
        assert!(ctx.history.is_empty());
    }

    #[test]
    fn test_passages_labelled_and_limited() {
        let results: Vec<_> = (1..=5).map(|i| result(&format!("passage {}", i), 0.5)).collect();
        let ctx = assemble("q", &results, &[], AssemblyLimits::default());
        assert!(ctx.system_context.contains("Document 1: passage 1"));
        assert!(ctx.system_context.contains("Document 3: passage 3"));
        assert!(!ctx.system_context.contains("passage 4"));
        assert!(ctx.system_context.contains("Relevant documents from knowledge base:"));
    }

    #[test]
    fn test_passage_preview_truncated() {
        let long = "a".repeat(400);
        let ctx = assemble("q", &[result(&long, 0.9)], &[], AssemblyLimits::default());
        let expected = format!("Document 1: {}...", "a".repeat(300));
        assert!(ctx.system_context.contains(&expected));
        assert!(!ctx.system_context.contains(&"a".repeat(301)));
    }

    #[test]
    fn test_preview_keeps_short_text_and_multibyte() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé...");
        assert_eq!(preview("exact", 5), "exact");
    }

    #[test]
    fn test_history_window_keeps_trailing_turns_in_order() {
        let history: Vec<_> = (0..10)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                ConversationTurn::new(role, format!("turn {}", i))
            })
            .collect();
        let ctx = assemble("and then?", &[], &history, AssemblyLimits::default());
        let kept: Vec<&str> = ctx.history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(kept, vec!["turn 4", "turn 5", "turn 6", "turn 7", "turn 8", "turn 9"]);
        assert!(!ctx.user_prompt.contains("turn 3"));
        assert!(ctx.user_prompt.contains("user: turn 4\nassistant: turn 5\n"));
    }

    #[test]
    fn test_history_reframes_prompt() {
        let history = vec![
            ConversationTurn::new(Role::User, "Tell me about Rust"),
            ConversationTurn::new(Role::Assistant, "Rust is a systems language."),
        ];
        let ctx = assemble("explain more", &[], &history, AssemblyLimits::default());
        assert!(ctx.user_prompt.starts_with("Based on our previous conversation:\n"));
        assert!(ctx.user_prompt.contains("Current question: explain more"));
        assert!(ctx
            .user_prompt
            .ends_with("considering the context of our conversation."));
    }

    #[test]
    fn test_blank_turns_dropped() {
        let history = vec![
            ConversationTurn::new(Role::User, "   "),
            ConversationTurn::new(Role::Assistant, "hello"),
        ];
        assert_eq!(recent_history(&history, 6).len(), 1);
        let only_blank = vec![ConversationTurn::new(Role::User, "")];
        let ctx = assemble("q", &[], &only_blank, AssemblyLimits::default());
        assert_eq!(ctx.user_prompt, "q");
    }
}
