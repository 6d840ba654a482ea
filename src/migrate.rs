use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Registry of ingested documents
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            extraction_method TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            stored_path TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector index; seq preserves insertion order for tie breaking
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            document_id TEXT,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_document_id ON vectors(document_id)")
        .execute(pool)
        .await?;

    // Documents referencing each vector; identical chunks are shared
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_refs (
            vector_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            PRIMARY KEY (vector_id, document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vector_refs_document_id ON vector_refs(document_id)")
        .execute(pool)
        .await?;

    // Databases created before vector_refs existed
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO vector_refs (vector_id, document_id)
        SELECT id, document_id FROM vectors WHERE document_id IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
