//! # KnowledgeOps
//!
//! Retrieval-augmented question answering over an uploaded document corpus.
//!
//! Documents (PDF, DOCX, text, Markdown) are extracted, chunked, embedded,
//! and stored in a SQLite vector index. Questions are answered by
//! retrieving the closest chunks and handing them, with any conversation
//! history, to a chat model. Without a chat model (or when it fails) the
//! answer is assembled from the retrieved passages instead.
//!
//! The pipeline itself (chunking, retrieval, prompt assembly, generation,
//! orchestration) lives in the `knowledgeops-core` crate. This crate adds
//! the concrete backends, persistence, ingestion, the HTTP API, and the
//! `kops` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Upload   │──▶│   Ingest     │──▶│   SQLite     │
//! │ CLI/HTTP  │   │ Extract+Chunk│   │ docs+vectors │
//! └───────────┘   │ +Embed       │   └──────┬───────┘
//!                 └──────────────┘          │
//!                                           ▼
//!                 ┌──────────────┐   ┌──────────────┐
//!   question ────▶│ Orchestrator │◀──│  Retriever   │
//!                 │ assemble+gen │   └──────────────┘
//!                 └──────┬───────┘
//!                        ▼
//!                 chat model or fallback
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_index`] | SQLite-backed vector index |
//! | [`embedding`] | OpenAI, Ollama, and fastembed embedders |
//! | [`llm`] | OpenAI-compatible and Ollama chat backends |
//! | [`extract`] | PDF/DOCX/text extraction |
//! | [`ingest`] | Ingestion pipeline |
//! | [`documents`] | Document registry |
//! | [`services`] | Shared service graph |
//! | [`query`] | `kops query` |
//! | [`stats`] | Index statistics |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod extract;
mod http;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod query;
pub mod server;
pub mod services;
pub mod sqlite_index;
pub mod stats;
