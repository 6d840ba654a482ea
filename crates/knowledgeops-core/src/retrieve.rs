//! Retriever: the embedder and the vector index behind one interface.
//!
//! Retrieval is always optional relative to generation, so the public
//! operations never fail: an unreachable embedder or a storage error is
//! logged and turns into an empty result set or a `false` flag. The
//! `try_*` variants return the underlying [`RetrievalError`] for callers
//! (like ingestion) that need to report why.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::models::{IndexInput, IndexedVector, RetrievalResult};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("vector storage failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("embedder returned {got} vectors for {expected} inputs")]
    EmbeddingCount { expected: usize, got: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Operational,
    Unconfigured,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub embedding_model: String,
    pub status: IndexStatus,
}

/// Stable identifier for a chunk: lower-case hex SHA-256 of its content.
pub fn content_id(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct Retriever {
    embedder: Backend<Arc<dyn Embedder>>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Backend<Arc<dyn Embedder>>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn is_configured(&self) -> bool {
        self.embedder.is_configured()
    }

    /// Model name of the configured embedder, or `"none"`.
    pub fn embedding_model(&self) -> &str {
        match &self.embedder {
            Backend::Configured(e) => e.model_name(),
            Backend::Unconfigured => "none",
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let embedder = match &self.embedder {
            Backend::Configured(e) => e,
            Backend::Unconfigured => return Err(BackendError::Unconfigured.into()),
        };
        let vectors = embedder.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(RetrievalError::EmbeddingCount {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }

    /// Embed and persist a batch. Returns the number of new entries;
    /// content already in the index is left as it is.
    pub async fn try_add_documents(&self, inputs: &[IndexInput]) -> Result<usize, RetrievalError> {
        if inputs.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = inputs.iter().map(|i| i.content.clone()).collect();
        let embeddings = self.embed(&texts).await?;

        let vectors: Vec<IndexedVector> = inputs
            .iter()
            .zip(embeddings)
            .map(|(input, embedding)| IndexedVector {
                id: content_id(&input.content),
                embedding,
                content: input.content.clone(),
                metadata: input.metadata.clone(),
            })
            .collect();

        let added = self
            .index
            .upsert(&vectors)
            .await
            .map_err(RetrievalError::Storage)?;
        tracing::debug!(batch = vectors.len(), added, "indexed chunk batch");
        Ok(added)
    }

    /// Like [`try_add_documents`](Self::try_add_documents) but reports
    /// only success.
    pub async fn add_documents(&self, inputs: &[IndexInput]) -> bool {
        match self.try_add_documents(inputs).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("failed to index {} chunks: {}", inputs.len(), e);
                false
            }
        }
    }

    pub async fn try_search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if max_results == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if self.index.count().await.map_err(RetrievalError::Storage)? == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        self.index
            .nearest(&query_vec, max_results)
            .await
            .map_err(RetrievalError::Storage)
    }

    /// Ranked passages for `query`, best first. Empty when the index is
    /// empty or any backend is unavailable.
    pub async fn search_similar(&self, query: &str, max_results: usize) -> Vec<RetrievalResult> {
        match self.try_search(query, max_results).await {
            Ok(results) => results,
            Err(RetrievalError::Backend(BackendError::Unconfigured)) => {
                tracing::debug!("retrieval skipped: no embedding backend configured");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("retrieval failed, continuing without sources: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn stats(&self) -> IndexStats {
        let embedding_model = self.embedding_model().to_string();
        match self.index.count().await {
            Ok(total_chunks) => IndexStats {
                total_chunks,
                embedding_model,
                status: if self.embedder.is_configured() {
                    IndexStatus::Operational
                } else {
                    IndexStatus::Unconfigured
                },
            },
            Err(e) => {
                tracing::warn!("failed to count indexed chunks: {:#}", e);
                IndexStats {
                    total_chunks: 0,
                    embedding_model,
                    status: IndexStatus::Error,
                }
            }
        }
    }

    pub async fn clear_all(&self) -> bool {
        match self.index.clear().await {
            Ok(()) => {
                tracing::info!("vector index cleared");
                true
            }
            Err(e) => {
                tracing::warn!("failed to clear vector index: {:#}", e);
                false
            }
        }
    }

    /// Remove the vectors indexed for one document.
    pub async fn remove_document(&self, document_id: &str) -> Result<usize, RetrievalError> {
        self.index
            .delete_where_document(document_id)
            .await
            .map_err(RetrievalError::Storage)
    }
}
