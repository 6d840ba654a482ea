//! Data types shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Free-form metadata attached to an indexed chunk (filename, chunk index,
/// source path, owning document).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A bounded window of a document's extracted text.
///
/// Offsets are character (not byte) positions into the source text and
/// describe the half-open span `[start_pos, end_pos)` that `text` was
/// taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub start_pos: usize,
    pub end_pos: usize,
    pub text: String,
    pub char_count: usize,
    pub word_count: usize,
}

/// One chunk handed to the retriever for indexing.
#[derive(Debug, Clone)]
pub struct IndexInput {
    pub content: String,
    pub metadata: Metadata,
}

impl IndexInput {
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// A stored embedding plus a denormalized copy of its chunk metadata.
///
/// `id` is derived from the content, so the same text always maps to the
/// same entry.
#[derive(Debug, Clone)]
pub struct IndexedVector {
    pub id: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: Metadata,
}

impl IndexedVector {
    /// The `document_id` metadata entry, when the chunk came through the
    /// ingestion pipeline.
    pub fn document_id(&self) -> Option<&str> {
        self.metadata.get("document_id").and_then(|v| v.as_str())
    }
}

/// A single search hit. `score` is in `[0, 1]`, 1 meaning identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A caller-supplied conversation message. History is read-only input;
/// the pipeline never stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The answer to one question, with the passages it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
    pub success: bool,
    pub rag_used: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
