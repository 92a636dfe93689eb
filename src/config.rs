use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::retrieval::ContextFormat;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RagConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for index snapshots. Empty means "let the path resolver decide".
    pub data_dir: String,
    pub index_file: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub load_timeout_secs: u64,
    pub embed_timeout_secs: u64,
    pub retry_backoff_ms: u64,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub dimensions: usize,
    pub max_elements: usize,
    pub max_nb_connection: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Upper bound on HNSW layers; `hnsw_rs` allows at most 16.
    pub max_layer: usize,
    pub write_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub turns_per_chunk: usize,
    pub overlap_percent: f64,
    pub max_tokens_per_chunk: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
    pub min_results: usize,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub format: ContextFormat,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub debounce_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            index_file: "conversation_index.bin".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_rag_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            load_timeout_secs: 30,
            embed_timeout_secs: 10,
            retry_backoff_ms: 500,
            batch_size: 32,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimensions: crate::embedding::EMBEDDING_DIM,
            max_elements: 10_000,
            max_nb_connection: 16,
            ef_construction: 200,
            ef_search: 64,
            max_layer: 16,
            write_timeout_secs: 10,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            turns_per_chunk: 5,
            overlap_percent: 0.25,
            max_tokens_per_chunk: 256,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.70,
            min_results: 3,
            max_tokens: 2000,
            timeout_secs: 10,
            format: ContextFormat::Xml,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { debounce_ms: 1500 }
    }
}

impl EmbeddingConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        expand_tilde(&self.cache_dir)
    }
}

impl IndexConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Returns `~/.convo-rag/`, or `./.convo-rag` when no home directory is known.
pub fn default_rag_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".convo-rag")
}

/// Returns the default config file path: `~/.convo-rag/config.toml`
pub fn default_config_path() -> PathBuf {
    default_rag_dir().join("config.toml")
}

impl RagConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            RagConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (CONVO_RAG_DATA_DIR, CONVO_RAG_MODEL_DIR, CONVO_RAG_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CONVO_RAG_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("CONVO_RAG_MODEL_DIR") {
            self.embedding.cache_dir = val;
        }
        if let Ok(val) = std::env::var("CONVO_RAG_LOG_LEVEL") {
            self.logging.log_level = val;
        }
    }

    /// Configured data directory, `None` when unset.
    pub fn data_dir(&self) -> Option<PathBuf> {
        let dir = self.storage.data_dir.trim();
        (!dir.is_empty()).then(|| expand_tilde(dir))
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RagConfig::default();
        assert_eq!(config.logging.log_level, "info");
        assert_eq!(config.index.dimensions, 384);
        assert_eq!(config.index.max_elements, 10_000);
        assert_eq!(config.chunking.turns_per_chunk, 5);
        assert_eq!(config.retrieval.min_results, 3);
        assert_eq!(config.retrieval.max_tokens, 2000);
        assert_eq!(config.retrieval.format, ContextFormat::Xml);
        assert!(config.embedding.cache_dir.ends_with("models"));
        assert!(config.data_dir().is_none());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[logging]
log_level = "debug"

[storage]
data_dir = "/tmp/rag-test"

[chunking]
turns_per_chunk = 4
overlap_percent = 0.2

[retrieval]
min_score = 0.5
format = "plain"
"#;
        let config: RagConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.data_dir(), Some(PathBuf::from("/tmp/rag-test")));
        assert_eq!(config.chunking.turns_per_chunk, 4);
        assert!((config.retrieval.min_score - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.format, ContextFormat::Plain);
        // defaults still apply for unset fields
        assert_eq!(config.chunking.max_tokens_per_chunk, 256);
        assert_eq!(config.storage.index_file, "conversation_index.bin");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = RagConfig::default();
        std::env::set_var("CONVO_RAG_DATA_DIR", "/tmp/override");
        std::env::set_var("CONVO_RAG_MODEL_DIR", "/tmp/models");
        std::env::set_var("CONVO_RAG_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.data_dir, "/tmp/override");
        assert_eq!(config.embedding.cache_dir, "/tmp/models");
        assert_eq!(config.logging.log_level, "trace");

        // Clean up
        std::env::remove_var("CONVO_RAG_DATA_DIR");
        std::env::remove_var("CONVO_RAG_MODEL_DIR");
        std::env::remove_var("CONVO_RAG_LOG_LEVEL");
    }
}
