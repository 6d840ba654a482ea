//! Process-wide service graph.
//!
//! Everything the CLI commands and HTTP handlers share is built once here
//! and passed down explicitly: the SQLite pool, the retriever over the
//! SQLite vector index, the generator, and the query orchestrator.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use knowledgeops_core::backend::Backend;
use knowledgeops_core::embedding::Embedder;
use knowledgeops_core::generate::{ChatBackend, Generator};
use knowledgeops_core::orchestrator::QueryOrchestrator;
use knowledgeops_core::retrieve::Retriever;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::llm::create_chat_backend;
use crate::sqlite_index::SqliteIndex;
use crate::{db, migrate};

pub struct Services {
    pub config: Config,
    pub pool: SqlitePool,
    pub retriever: Arc<Retriever>,
    pub generator: Arc<Generator>,
    pub orchestrator: Arc<QueryOrchestrator>,
}

impl Services {
    /// Connect, migrate, and construct backends from the config.
    pub async fn build(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let chat = create_chat_backend(&config.generation)?;
        Self::with_backends(config, embedder, chat).await
    }

    /// Like [`build`](Self::build) with caller-supplied backends.
    pub async fn with_backends(
        config: Config,
        embedder: Backend<Arc<dyn Embedder>>,
        chat: Backend<Arc<dyn ChatBackend>>,
    ) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;

        let index = Arc::new(SqliteIndex::new(pool.clone()));
        let retriever = Arc::new(Retriever::new(embedder, index));
        let generator = Arc::new(Generator::new(chat, config.generation.settings()));
        let orchestrator = Arc::new(
            QueryOrchestrator::new(
                retriever.clone(),
                generator.clone(),
                config.retrieval.assembly_limits(),
            )
            .with_default_max_results(config.retrieval.max_results),
        );

        tracing::debug!(
            embedding = retriever.embedding_model(),
            generation = generator.model_id(),
            "services ready"
        );

        Ok(Self {
            config,
            pool,
            retriever,
            generator,
            orchestrator,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
