//! In-memory [`VectorIndex`] for tests and embedded use.
//!
//! All state sits behind a single `std::sync::RwLock`, which makes every
//! trait operation atomic: searches share the read lock, while upserts,
//! clears and deletes take the write lock. Search is brute-force cosine
//! similarity over all stored vectors.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{rank, VectorIndex};
use crate::embedding::similarity_score;
use crate::models::{IndexedVector, RetrievalResult};

#[derive(Default)]
struct State {
    /// Insertion order.
    entries: Vec<IndexedVector>,
    /// Vector id → documents referencing it.
    refs: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("vector index lock poisoned"))
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, vectors: &[IndexedVector]) -> Result<usize> {
        let mut state = self.write()?;
        let State { entries, refs } = &mut *state;
        let mut added = 0;
        for v in vectors {
            let docs = refs.entry(v.id.clone()).or_insert_with(|| {
                entries.push(v.clone());
                added += 1;
                HashSet::new()
            });
            if let Some(doc) = v.document_id() {
                docs.insert(doc.to_string());
            }
        }
        Ok(added)
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<RetrievalResult>> {
        let state = self.read()?;
        let scored = state
            .entries
            .iter()
            .map(|v| RetrievalResult {
                content: v.content.clone(),
                metadata: v.metadata.clone(),
                score: similarity_score(query, &v.embedding),
            })
            .collect();
        Ok(rank(scored, limit))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.write()?;
        state.entries.clear();
        state.refs.clear();
        Ok(())
    }

    async fn delete_where_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.write()?;
        let State { entries, refs } = &mut *state;

        let mut orphaned = HashSet::new();
        for (id, docs) in refs.iter_mut() {
            if docs.remove(document_id) && docs.is_empty() {
                orphaned.insert(id.clone());
            }
        }
        refs.retain(|id, _| !orphaned.contains(id));
        entries.retain(|v| !orphaned.contains(&v.id));
        Ok(orphaned.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn vector(id: &str, embedding: Vec<f32>, doc: &str) -> IndexedVector {
        let mut metadata = Metadata::new();
        metadata.insert("document_id".into(), doc.into());
        IndexedVector {
            id: id.to_string(),
            embedding,
            content: format!("content {}", id),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_upsert_skips_existing_ids() {
        let index = InMemoryIndex::new();
        let batch = vec![vector("a", vec![1.0, 0.0], "d1"), vector("b", vec![0.0, 1.0], "d1")];
        assert_eq!(index.upsert(&batch).await.unwrap(), 2);
        assert_eq!(index.upsert(&batch).await.unwrap(), 0);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_nearest_orders_by_score_then_insertion() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                vector("low", vec![0.0, 1.0], "d"),
                vector("tie-first", vec![1.0, 1.0], "d"),
                vector("best", vec![1.0, 0.0], "d"),
                vector("tie-second", vec![1.0, 1.0], "d"),
            ])
            .await
            .unwrap();

        let results = index.nearest(&[1.0, 0.0], 10).await.unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(
            order,
            vec!["content best", "content tie-first", "content tie-second", "content low"]
        );
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_nearest_respects_limit_and_empty_index() {
        let index = InMemoryIndex::new();
        assert!(index.nearest(&[1.0], 5).await.unwrap().is_empty());
        index
            .upsert(&[vector("a", vec![1.0], "d"), vector("b", vec![1.0], "d")])
            .await
            .unwrap();
        assert_eq!(index.nearest(&[1.0], 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_then_reuse() {
        let index = InMemoryIndex::new();
        index.upsert(&[vector("a", vec![1.0], "d")]).await.unwrap();
        index.clear().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
        assert_eq!(index.upsert(&[vector("a", vec![1.0], "d")]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_where_document() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                vector("a", vec![1.0], "d1"),
                vector("b", vec![1.0], "d2"),
                vector("c", vec![1.0], "d1"),
            ])
            .await
            .unwrap();
        assert_eq!(index.delete_where_document("d1").await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 1);
        // removed ids can be indexed again
        assert_eq!(index.upsert(&[vector("a", vec![1.0], "d3")]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shared_vector_survives_until_last_reference() {
        let index = InMemoryIndex::new();
        assert_eq!(index.upsert(&[vector("same", vec![1.0], "d1")]).await.unwrap(), 1);
        assert_eq!(index.upsert(&[vector("same", vec![1.0], "d2")]).await.unwrap(), 0);

        assert_eq!(index.delete_where_document("d1").await.unwrap(), 0);
        assert_eq!(index.nearest(&[1.0], 5).await.unwrap().len(), 1);
        assert_eq!(index.delete_where_document("d2").await.unwrap(), 1);
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_skips_vectors_without_document() {
        let index = InMemoryIndex::new();
        let mut loose = vector("loose", vec![1.0], "d1");
        loose.metadata.remove("document_id");
        index
            .upsert(&[loose, vector("owned", vec![1.0], "d1")])
            .await
            .unwrap();
        assert_eq!(index.delete_where_document("d1").await.unwrap(), 1);
        let left = index.nearest(&[1.0], 5).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].content, "content loose");
    }
}
