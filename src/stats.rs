//! Index statistics and service overview.
//!
//! [`collect_stats`] backs both `GET /api/stats` and `kops stats`.

use anyhow::Result;
use serde::Serialize;

use knowledgeops_core::retrieve::IndexStatus;

use crate::config::Config;
use crate::documents;
use crate::services::Services;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationInfo {
    pub provider: String,
    pub model: String,
    pub configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_documents: i64,
    pub total_chunks: usize,
    pub embedding_model: String,
    pub status: IndexStatus,
    pub generation: GenerationInfo,
}

pub async fn collect_stats(services: &Services) -> Result<Stats> {
    let total_documents = documents::count_documents(&services.pool).await?;
    let index = services.retriever.stats().await;
    Ok(Stats {
        total_documents,
        total_chunks: index.total_chunks,
        embedding_model: index.embedding_model,
        status: index.status,
        generation: GenerationInfo {
            provider: services.config.generation.provider.clone(),
            model: services.generator.model_id().to_string(),
            configured: services.generator.is_configured(),
        },
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let services = Services::build(config.clone()).await?;
    let stats = collect_stats(&services).await?;
    services.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("KnowledgeOps: Index Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.total_documents);
    println!("  Chunks:      {}", stats.total_chunks);
    println!(
        "  Embedding:   {} ({})",
        stats.embedding_model,
        status_label(stats.status)
    );
    println!(
        "  Generation:  {} / {} ({})",
        stats.generation.provider,
        stats.generation.model,
        if stats.generation.configured {
            "configured"
        } else {
            "fallback only"
        }
    );
    println!();
    Ok(())
}

fn status_label(status: IndexStatus) -> &'static str {
    match status {
        IndexStatus::Operational => "operational",
        IndexStatus::Unconfigured => "unconfigured",
        IndexStatus::Error => "error",
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
