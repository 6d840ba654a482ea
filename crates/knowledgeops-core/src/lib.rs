//! # KnowledgeOps Core
//!
//! The retrieval-augmented query pipeline, free of any storage engine,
//! HTTP client, or runtime:
//!
//! ```text
//! text ─▶ chunk ─▶ embed ─▶ VectorIndex            (write path)
//! question + history ─▶ Retriever ─▶ assemble ─▶ Generator ─▶ QueryResult
//! ```
//!
//! Backends (embedding model, chat model, vector storage) are traits the
//! application crate implements. Every optional backend is carried as a
//! [`Backend`](backend::Backend) so the degraded path is an ordinary
//! `match` arm.

pub mod assemble;
pub mod backend;
pub mod chunk;
pub mod embedding;
pub mod generate;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod retrieve;

#[cfg(test)]
pub(crate) mod test_support;
