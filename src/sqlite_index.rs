//! SQLite-backed [`VectorIndex`].
//!
//! Vectors live in the `vectors` table as little-endian f32 blobs. Search
//! is a brute-force cosine scan in `seq` order, so ties rank in insertion
//! order. Each upsert batch runs in one transaction; SQLite serializes it
//! against `clear` and deletes.
//!
//! `vector_refs` holds one row per (vector, document) pair. A vector is
//! deleted with a document only when that document held its last reference.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use knowledgeops_core::embedding::{blob_to_vec, similarity_score, vec_to_blob};
use knowledgeops_core::index::{rank, VectorIndex};
use knowledgeops_core::models::{IndexedVector, Metadata, RetrievalResult};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, vectors: &[IndexedVector]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut added = 0usize;

        for v in vectors {
            let metadata_json = serde_json::to_string(&v.metadata)?;
            let result = sqlx::query(
                r#"
                INSERT INTO vectors (id, document_id, content, metadata_json, embedding, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&v.id)
            .bind(v.document_id())
            .bind(&v.content)
            .bind(&metadata_json)
            .bind(vec_to_blob(&v.embedding))
            .bind(v.embedding.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected() as usize;

            if let Some(document_id) = v.document_id() {
                sqlx::query("INSERT OR IGNORE INTO vector_refs (vector_id, document_id) VALUES (?, ?)")
                    .bind(&v.id)
                    .bind(document_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(added)
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<RetrievalResult>> {
        let rows = sqlx::query("SELECT content, metadata_json, embedding FROM vectors ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .with_context(|| "corrupt vector metadata")?;
            scored.push(RetrievalResult {
                content: row.get("content"),
                metadata,
                score: similarity_score(query, &blob_to_vec(&blob)),
            });
        }

        Ok(rank(scored, limit))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vectors").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM vector_refs").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_where_document(&self, document_id: &str) -> Result<usize> {
        // Write first so the transaction takes the write lock up front.
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            DELETE FROM vectors
            WHERE id IN (SELECT vector_id FROM vector_refs WHERE document_id = ?)
              AND NOT EXISTS (
                  SELECT 1 FROM vector_refs r
                  WHERE r.vector_id = vectors.id AND r.document_id != ?
              )
            "#,
        )
        .bind(document_id)
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM vector_refs WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }
}
