//! Deterministic backends for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::BackendError;
use crate::embedding::Embedder;
use crate::generate::{ChatBackend, ChatMessage};

/// Bag-of-words embedder over a fixed vocabulary. `"ml"` counts as
/// "machine learning".
pub struct KeywordEmbedder {
    vocab: Vec<&'static str>,
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            vocab: vec![
                "machine", "learning", "python", "rust", "cooking", "pasta", "deploy", "docker",
            ],
            calls: AtomicUsize::new(0),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.vocab.len()];
        let lower = text.to_lowercase();
        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            let expanded: &[&str] = if token == "ml" {
                &["machine", "learning"]
            } else {
                std::slice::from_ref(&token)
            };
            for word in expanded {
                if let Some(i) = self.vocab.iter().position(|w| w == word) {
                    v[i] += 1.0;
                }
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }
    fn dims(&self) -> usize {
        self.vocab.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

/// Embedder that is always unreachable.
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn model_name(&self) -> &str {
        "down"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Err(BackendError::Unreachable("connection refused".to_string()))
    }
}

/// Chat backend returning a canned reply (or error) and recording the
/// messages it was sent.
pub struct ScriptedChat {
    reply: Result<String, BackendError>,
    pub calls: AtomicUsize,
    pub last_messages: Mutex<Vec<ChatMessage>>,
}

impl ScriptedChat {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: BackendError) -> Self {
        Self {
            reply: Err(err),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    fn model_id(&self) -> &str {
        "scripted/test-model"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();
        self.reply.clone()
    }
}
