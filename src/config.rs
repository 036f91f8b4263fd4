//! TOML configuration.
//!
//! Every section except `[store]` and `[corpus]` has defaults, so a minimal
//! config only names where the corpus lives and where indexes are kept.
//! API keys are read from the environment, never from this file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use rag_chat_core::chunk::ChunkingParams;
use rag_chat_core::store::validate_store_id;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding one SQLite file per store id.
    pub root: PathBuf,
    #[serde(default = "default_store_name")]
    pub name: String,
    /// Derive the store id from the corpus fingerprint instead of `name` alone.
    #[serde(default)]
    pub key_by_content: bool,
}

fn default_store_name() -> String {
    "chroma_db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// A single text file, or a directory walked with the globs below.
    pub path: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    rag_chat_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    rag_chat_core::chunk::DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    rag_chat_core::retriever::DEFAULT_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Base URL override (OpenAI-compatible gateway, or the Ollama host).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(1536),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_chat_provider(),
            model: default_chat_model(),
            timeout_secs: default_chat_timeout(),
            temperature: None,
            url: None,
        }
    }
}

fn default_chat_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_chat_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    pub fn chunking_params(&self) -> Result<ChunkingParams> {
        Ok(ChunkingParams::new(
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        )?)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;

    // Validate store
    validate_store_id(&config.store.name)
        .map_err(|e| anyhow::anyhow!("store.name is invalid: {}", e))?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate retrieval
    if config.retrieval.k < 1 {
        bail!("retrieval.k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate chat
    match config.chat.provider.as_str() {
        "openai" | "ollama" => {}
        other => bail!(
            "Unknown chat provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.chat.model.trim().is_empty() {
        bail!("chat.model must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[store]
root = "./db"

[corpus]
path = "./documents/moby_dick.txt"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.store.name, "chroma_db");
        assert!(!cfg.store.key_by_content);
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.chunk_overlap, 200);
        assert_eq!(cfg.retrieval.k, 3);
        assert_eq!(cfg.embedding.provider, "openai");
        assert_eq!(cfg.embedding.model.as_deref(), Some("text-embedding-3-small"));
        assert_eq!(cfg.chat.model, "gpt-4o-mini");
        assert_eq!(cfg.server.bind, "127.0.0.1:7341");
        assert_eq!(cfg.corpus.include_globs, vec!["**/*.txt", "**/*.md"]);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let toml = format!("{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err().to_string();
        assert!(err.contains("chunk_overlap"), "{}", err);
    }

    #[test]
    fn test_zero_k_rejected() {
        let toml = format!("{}\n[retrieval]\nk = 0\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        let toml = format!("{}\n[embedding]\nprovider = \"cohere\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
        let toml = format!("{}\n[chat]\nprovider = \"bard\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_ollama_requires_dims() {
        let toml = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n",
            MINIMAL
        );
        let err = parse_config(&toml).unwrap_err().to_string();
        assert!(err.contains("embedding.dims"), "{}", err);
    }

    #[test]
    fn test_bad_store_name_rejected() {
        let toml = MINIMAL.replace("root = \"./db\"", "root = \"./db\"\nname = \"../escape\"");
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/ragchat.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/ragchat.example.toml")).unwrap();
        assert_eq!(cfg.embedding.dims, Some(1536));
        assert_eq!(cfg.retrieval.k, 3);
    }
}
