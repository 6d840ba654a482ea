use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use knowledgeops_core::assemble::AssemblyLimits;
use knowledgeops_core::generate::GenerationSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Chunks kept per document; 0 means unlimited.
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_max_chunks_per_doc() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            max_sources: default_max_sources(),
            max_history_turns: default_max_history_turns(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn assembly_limits(&self) -> AssemblyLimits {
        AssemblyLimits {
            max_sources: self.max_sources,
            max_history_turns: self.max_history_turns,
            preview_chars: self.preview_chars,
        }
    }
}

fn default_max_results() -> usize {
    5
}
fn default_max_sources() -> usize {
    3
}
fn default_max_history_turns() -> usize {
    6
}
fn default_preview_chars() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `ollama` and `openai` (OpenAI-compatible servers).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Overrides the provider's default base URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key. Defaults per provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_generation_model(),
            url: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn settings(&self) -> GenerationSettings {
        GenerationSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

fn default_generation_model() -> String {
    "llama3-70b-8192".to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Uploaded originals are kept here, one file per document.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            storage_dir: default_storage_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("./storage")
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size <= config.chunking.overlap {
        anyhow::bail!(
            "chunking.chunk_size ({}) must be greater than chunking.overlap ({})",
            config.chunking.chunk_size,
            config.chunking.overlap
        );
    }

    // Validate retrieval
    if config.retrieval.max_results < 1 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }
    if config.retrieval.max_sources < 1 {
        anyhow::bail!("retrieval.max_sources must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "groq" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, groq, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.max_tokens == 0 {
        anyhow::bail!("generation.max_tokens must be > 0");
    }

    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/kops.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 500);
        assert_eq!(cfg.chunking.overlap, 50);
        assert_eq!(cfg.retrieval.max_results, 5);
        assert_eq!(cfg.retrieval.assembly_limits(), AssemblyLimits::default());
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.generation.is_enabled());
        assert_eq!(cfg.generation.model, "llama3-70b-8192");
        assert_eq!(cfg.generation.settings(), GenerationSettings::default());
        assert_eq!(cfg.server.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nchunk_size = 50\noverlap = 50\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn unknown_providers_rejected() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[generation]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn remote_embedding_needs_model_and_dims() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
        assert!(parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n"
        )
        .is_ok());
    }

    #[test]
    fn temperature_range_checked() {
        assert!(parse_config("[db]\npath = \"x\"\n[generation]\ntemperature = 3.5\n").is_err());
    }
}
