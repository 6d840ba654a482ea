//! Ingestion pipeline: extract → chunk → embed/index → store → register.
//!
//! Extraction and chunking are CPU-bound and run on the blocking pool.
//!
//! Ingesting one file is all-or-nothing. Embedding and indexing happen
//! first (the index upsert is a single transaction); if storing the
//! original or registering the document then fails, the vectors indexed
//! for that document are removed again before the error is returned.

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

use knowledgeops_core::chunk::{chunk_text, ChunkError};
use knowledgeops_core::models::{IndexInput, Metadata};
use knowledgeops_core::retrieve::RetrievalError;

use crate::config::Config;
use crate::documents::{self, DocumentRecord};
use crate::extract::{self, ExtractError};
use crate::services::Services;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("file is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("extraction task failed: {0}")]
    Worker(String),

    #[error("indexing failed: {0}")]
    Index(#[from] RetrievalError),

    #[error("failed to persist document: {0:#}")]
    Storage(anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub file_size: usize,
    pub file_type: String,
    pub extraction_method: String,
    pub chunks_indexed: usize,
    /// Chunks that were not already in the index.
    pub new_vectors: usize,
    /// More than `max_chunks_per_doc` chunks were produced and the rest dropped.
    pub truncated: bool,
}

/// Outcome for one file of a path or batch ingest.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<IngestReport, IngestError>,
}

/// Reduce a client-supplied name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Ingest one file's bytes.
pub async fn ingest_bytes(
    services: &Services,
    filename: &str,
    bytes: &[u8],
) -> Result<IngestReport, IngestError> {
    let config = &services.config;
    let limit = config.server.max_upload_bytes;
    if bytes.len() > limit {
        return Err(IngestError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }

    let filename = sanitize_filename(filename);
    let (extracted, mut chunks) = {
        let owned = bytes.to_vec();
        let name = filename.clone();
        let (chunk_size, overlap) = (config.chunking.chunk_size, config.chunking.overlap);
        tokio::task::spawn_blocking(move || -> Result<_, IngestError> {
            let extracted = extract::parse_bytes(&owned, &name)?;
            let chunks = chunk_text(&extracted.text, chunk_size, overlap)?;
            Ok((extracted, chunks))
        })
        .await
        .map_err(|e| IngestError::Worker(e.to_string()))??
    };
    let max_chunks = config.chunking.max_chunks_per_doc;
    let truncated = max_chunks > 0 && chunks.len() > max_chunks;
    if truncated {
        tracing::warn!(
            file = %filename,
            produced = chunks.len(),
            kept = max_chunks,
            "document truncated to chunk limit"
        );
        chunks.truncate(max_chunks);
    }

    let document_id = Uuid::new_v4().to_string();
    let stored_path = config
        .server
        .storage_dir
        .join(format!("{}_{}", document_id, filename));
    let source_file = stored_path.display().to_string();

    let inputs: Vec<IndexInput> = chunks
        .iter()
        .map(|chunk| {
            let mut metadata = Metadata::new();
            metadata.insert("filename".into(), filename.clone().into());
            metadata.insert("chunk_index".into(), chunk.index.into());
            metadata.insert("source_file".into(), source_file.clone().into());
            metadata.insert("document_id".into(), document_id.clone().into());
            IndexInput::new(chunk.text.clone(), metadata)
        })
        .collect();

    let new_vectors = services.retriever.try_add_documents(&inputs).await?;

    let record = DocumentRecord {
        id: document_id.clone(),
        filename: filename.clone(),
        file_type: extracted.metadata.file_type.as_str().to_string(),
        file_size: bytes.len() as i64,
        extraction_method: extracted.metadata.extraction_method.to_string(),
        chunk_count: chunks.len() as i64,
        stored_path: source_file,
        created_at: chrono::Utc::now().timestamp(),
    };

    if let Err(e) = persist(services, &stored_path, bytes, &record).await {
        rollback(services, &document_id, &stored_path).await;
        return Err(IngestError::Storage(e));
    }

    tracing::info!(
        document_id = %document_id,
        file = %filename,
        chunks = chunks.len(),
        new_vectors,
        "ingested document"
    );

    Ok(IngestReport {
        document_id,
        filename,
        file_size: bytes.len(),
        file_type: record.file_type,
        extraction_method: record.extraction_method,
        chunks_indexed: chunks.len(),
        new_vectors,
        truncated,
    })
}

async fn persist(
    services: &Services,
    stored_path: &Path,
    bytes: &[u8],
    record: &DocumentRecord,
) -> Result<()> {
    if let Some(dir) = stored_path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(stored_path, bytes).await?;
    documents::insert_document(&services.pool, record).await?;
    Ok(())
}

async fn rollback(services: &Services, document_id: &str, stored_path: &Path) {
    match services.retriever.remove_document(document_id).await {
        Ok(n) => tracing::warn!(document_id, removed = n, "rolled back indexed chunks"),
        Err(e) => tracing::error!(document_id, "rollback of indexed chunks failed: {}", e),
    }
    documents::remove_stored_file(stored_path);
}

/// Ingest a file, or every supported file under a directory.
///
/// Per-file failures are collected, not raised.
pub async fn ingest_path(services: &Services, path: &Path) -> Result<Vec<FileOutcome>> {
    if !path.exists() {
        anyhow::bail!("Path does not exist: {}", path.display());
    }

    let files: Vec<PathBuf> = if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(extract::is_supported)
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    };

    let mut outcomes = Vec::with_capacity(files.len());
    for file in files {
        let result = ingest_file(services, &file).await;
        if let Err(e) = &result {
            tracing::warn!("skipping {}: {}", file.display(), e);
        }
        outcomes.push(FileOutcome { path: file, result });
    }
    Ok(outcomes)
}

async fn ingest_file(services: &Services, path: &Path) -> Result<IngestReport, IngestError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !extract::is_supported(&filename) {
        return Err(ExtractError::UnsupportedFileType(filename).into());
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })?;
    ingest_bytes(services, &filename, &bytes).await
}

pub async fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let services = Services::build(config.clone()).await?;
    let outcomes = ingest_path(&services, path).await?;
    services.close().await;

    let mut files_ingested = 0;
    let mut chunks_indexed = 0;
    let mut failures = 0;

    println!("ingest {}", path.display());
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                files_ingested += 1;
                chunks_indexed += report.chunks_indexed;
                println!(
                    "  + {} ({} chunks{})",
                    outcome.path.display(),
                    report.chunks_indexed,
                    if report.truncated { ", truncated" } else { "" }
                );
            }
            Err(e) => {
                failures += 1;
                println!("  ! {}: {}", outcome.path.display(), e);
            }
        }
    }
    println!("  files ingested: {}", files_ingested);
    println!("  chunks indexed: {}", chunks_indexed);
    println!("  failures: {}", failures);

    if files_ingested == 0 && failures > 0 {
        anyhow::bail!("no files were ingested");
    }
    println!("ok");
    Ok(())
}
