//! Registry of ingested documents.
//!
//! One row per uploaded file in the `documents` table. The chunks
//! themselves live in the vector index, tagged with the document id.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::config::Config;
use crate::services::Services;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub extraction_method: String,
    pub chunk_count: i64,
    pub stored_path: String,
    /// Unix seconds.
    pub created_at: i64,
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> DocumentRecord {
    DocumentRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        file_type: row.get("file_type"),
        file_size: row.get("file_size"),
        extraction_method: row.get("extraction_method"),
        chunk_count: row.get("chunk_count"),
        stored_path: row.get("stored_path"),
        created_at: row.get("created_at"),
    }
}

pub async fn insert_document(pool: &SqlitePool, doc: &DocumentRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (id, filename, file_type, file_size, extraction_method, chunk_count, stored_path, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.filename)
    .bind(&doc.file_type)
    .bind(doc.file_size)
    .bind(&doc.extraction_method)
    .bind(doc.chunk_count)
    .bind(&doc.stored_path)
    .bind(doc.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<DocumentRecord>> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(record_from_row))
}

/// Newest first.
pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<DocumentRecord>> {
    let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at DESC, rowid DESC")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(record_from_row).collect())
}

pub async fn count_documents(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Delete a document's vectors, registry row, and stored original.
///
/// Returns `false` when no document has this id.
pub async fn delete_document(services: &Services, id: &str) -> Result<bool> {
    let Some(doc) = get_document(&services.pool, id).await? else {
        return Ok(false);
    };

    let removed = services.retriever.remove_document(id).await?;
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&services.pool)
        .await?;
    remove_stored_file(Path::new(&doc.stored_path));

    tracing::info!(document_id = id, vectors = removed, "deleted document");
    Ok(true)
}

/// Empty the vector index and the registry, and remove stored originals.
///
/// Returns whether the vector index was cleared.
pub async fn clear_all(services: &Services) -> Result<bool> {
    let docs = list_documents(&services.pool).await?;
    let cleared = services.retriever.clear_all().await;
    if cleared {
        sqlx::query("DELETE FROM documents")
            .execute(&services.pool)
            .await?;
        for doc in &docs {
            remove_stored_file(Path::new(&doc.stored_path));
        }
    }
    Ok(cleared)
}

pub(crate) fn remove_stored_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

// ============ CLI ============

pub async fn run_list(config: &Config) -> Result<()> {
    let services = Services::build(config.clone()).await?;
    let docs = list_documents(&services.pool).await?;

    if docs.is_empty() {
        println!("No documents.");
    } else {
        println!(
            "{:<36}  {:<6} {:>8} {:>7}  {:<16}  FILENAME",
            "ID", "TYPE", "SIZE", "CHUNKS", "CREATED"
        );
        for doc in &docs {
            println!(
                "{:<36}  {:<6} {:>8} {:>7}  {:<16}  {}",
                doc.id,
                doc.file_type,
                doc.file_size,
                doc.chunk_count,
                format_ts(doc.created_at),
                doc.filename
            );
        }
    }

    services.close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let services = Services::build(config.clone()).await?;
    let deleted = delete_document(&services, id).await?;
    services.close().await;

    if !deleted {
        anyhow::bail!("No document with id '{}'", id);
    }
    println!("Deleted document {}", id);
    Ok(())
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let services = Services::build(config.clone()).await?;
    let cleared = clear_all(&services).await?;
    services.close().await;

    if !cleared {
        anyhow::bail!("Failed to clear the vector index");
    }
    println!("Index cleared.");
    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
