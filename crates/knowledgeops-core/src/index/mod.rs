//! Vector storage abstraction.
//!
//! The [`VectorIndex`] trait is the one shared, mutable resource in the
//! pipeline. Implementations must make each operation atomic with respect
//! to the others: a `clear` never interleaves with an in-flight `upsert`
//! batch or `nearest` scan.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorIndex::upsert) | Insert a batch; existing ids are left untouched |
//! | [`nearest`](VectorIndex::nearest) | Cosine search, best first, ties in insertion order |
//! | [`count`](VectorIndex::count) | Number of stored vectors |
//! | [`clear`](VectorIndex::clear) | Remove everything |
//! | [`delete_where_document`](VectorIndex::delete_where_document) | Drop one document's references; delete vectors left unreferenced |
//!
//! # Shared chunks
//!
//! Ids are content hashes, so two documents with the same chunk text share
//! one stored vector. Every upsert records the `document_id` from the
//! vector's metadata as a reference, including when the id already exists.
//! A vector is only removed by document deletion once no document
//! references it.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexedVector, RetrievalResult};

pub use memory::InMemoryIndex;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Persist a batch atomically and record each vector's document
    /// reference. Returns how many ids were new.
    async fn upsert(&self, vectors: &[IndexedVector]) -> Result<usize>;

    /// Up to `limit` results ordered by descending score. Equal scores keep
    /// insertion order.
    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<RetrievalResult>>;

    async fn count(&self) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    /// Drop `document_id`'s references and delete the vectors no other
    /// document still references. Returns the number of vectors deleted.
    async fn delete_where_document(&self, document_id: &str) -> Result<usize>;
}

/// Sort scored candidates best-first and keep `limit`.
///
/// `sort_by` is stable, so callers that collect candidates in insertion
/// order get insertion-order tie breaking for free.
pub fn rank(mut results: Vec<RetrievalResult>, limit: usize) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}
