//! Concrete embedding backends.
//!
//! Implements [`Embedder`] for:
//! - **[`OpenAIEmbedder`]**: `POST {url}/v1/embeddings` with batching, retry, and backoff.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`LocalEmbedder`]**: in-process fastembed models; no network calls after
//!   the first model download.
//!
//! Use [`create_embedder`] to build the one named by `[embedding].provider`.
//! A `"disabled"` provider, or a missing API key, yields
//! [`Backend::Unconfigured`]; retrieval then returns no passages.
//!
//! # Retry Strategy
//!
//! The HTTP embedders retry transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use knowledgeops_core::backend::{Backend, BackendError};
use knowledgeops_core::embedding::Embedder;

use crate::config::EmbeddingConfig;
use crate::http;

const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Build the embedder named by the config.
///
/// # Supported Providers
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | none ([`Backend::Unconfigured`]) |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | [`LocalEmbedder`] (feature `local-embeddings-fastembed`) |
///
/// # Errors
///
/// Unknown provider names, unknown local models, or `"local"` without the
/// fastembed feature.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Backend<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(Backend::Unconfigured),
        "openai" => match OpenAIEmbedder::new(config)? {
            Some(e) => Ok(Backend::Configured(Arc::new(e))),
            None => {
                tracing::warn!(
                    "{} not set; embeddings disabled, queries will run without retrieval",
                    OPENAI_API_KEY_ENV
                );
                Ok(Backend::Unconfigured)
            }
        },
        "ollama" => Ok(Backend::Configured(Arc::new(OllamaEmbedder::new(config)?))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Backend::Configured(Arc::new(LocalEmbedder::new(config)?))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn required_model(config: &EmbeddingConfig, provider: &str) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))
}

fn required_dims(config: &EmbeddingConfig, provider: &str) -> Result<usize> {
    config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))
}

// ============ OpenAI ============

/// Embedder for the OpenAI embeddings API, or any server speaking it.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAIEmbedder {
    /// `Ok(None)` when `OPENAI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Option<Self>> {
        let model = required_model(config, "OpenAI")?;
        let dims = required_dims(config, "OpenAI")?;
        let api_key = match std::env::var(OPENAI_API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

        Ok(Some(Self {
            client: http::client(config.timeout_secs)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        }))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/v1/embeddings", self.url);

        let json = http::send_json_with_retry(
            || {
                self.client
                    .post(&endpoint)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&body)
            },
            self.max_retries,
            self.timeout_secs,
        )
        .await?;

        parse_openai_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, BackendError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| BackendError::InvalidResponse("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| BackendError::InvalidResponse("missing embedding".to_string()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance.
///
/// Requires an embedding model to be pulled, e.g. `ollama pull nomic-embed-text`.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = required_model(config, "Ollama")?;
        let dims = required_dims(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let endpoint = format!("{}/api/embed", self.url);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = http::send_json_with_retry(
                || self.client.post(&endpoint).json(&body),
                self.max_retries,
                self.timeout_secs,
            )
            .await?;
            out.extend(parse_ollama_response(&json)?);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, BackendError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| BackendError::InvalidResponse("missing embeddings array".to_string()))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding.as_array().map(|a| to_f32_vec(a)).ok_or_else(|| {
                BackendError::InvalidResponse("embedding is not an array".to_string())
            })
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Local (fastembed) ============

/// In-process embeddings via fastembed.
///
/// The model is downloaded from Hugging Face on first use, then loaded
/// once and reused for every later call.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    fastembed_model: fastembed::EmbeddingModel,
    batch_size: usize,
    timeout_secs: u64,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            fastembed_model,
            batch_size: config.batch_size.max(1),
            timeout_secs: config.timeout_secs,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let slot = Arc::clone(&self.model);
        let fastembed_model = self.fastembed_model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        blocking_with_timeout(self.timeout_secs, move || {
            let mut guard = slot
                .lock()
                .map_err(|_| BackendError::Unreachable("local model lock poisoned".to_string()))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    BackendError::Unreachable(format!(
                        "failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(model);
            }
            let model = guard.as_mut().ok_or_else(|| {
                BackendError::Unreachable("local embedding model unavailable".to_string())
            })?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| BackendError::InvalidResponse(format!("local embedding failed: {}", e)))
        })
        .await
    }
}

/// Run `work` on the blocking pool, giving up after `timeout_secs`.
///
/// The work itself is not cancelled; a model load that outlives the timeout
/// still finishes and is reused by the next call.
#[cfg(any(feature = "local-embeddings-fastembed", test))]
async fn blocking_with_timeout<T, F>(timeout_secs: u64, work: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), task).await {
        Ok(joined) => joined
            .map_err(|e| BackendError::Unreachable(format!("embedding task failed: {}", e)))?,
        Err(_) => Err(BackendError::Timeout(timeout_secs)),
    }
}

#[cfg_attr(not(feature = "local-embeddings-fastembed"), allow(dead_code))]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}
