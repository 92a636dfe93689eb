//! The engine: one owned bundle of generator, index, token counter, path
//! resolver and config, exposing the operations collaborators call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chunker::{ChunkerOptions, ConversationChunker};
use crate::config::RagConfig;
use crate::debounce::Debouncer;
use crate::embedding::EmbeddingGenerator;
use crate::error::IndexError;
use crate::index::{IndexOptions, IndexStats, VectorIndex};
use crate::paths::{DataDirResolver, PathResolver};
use crate::retrieval::{RetrievalController, RetrievalOptions, RetrievalOutcome};
use crate::tokens::{create_token_counter, TokenCounter};
use crate::types::{Chunk, RetrievalResult, Turn};

/// Result of ingesting a conversation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub success: bool,
    pub chunks_processed: usize,
    pub index_ids: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestReport {
    fn rejected(reason: &str, error: Option<String>) -> Self {
        Self {
            reason: Some(reason.to_string()),
            error,
            ..Default::default()
        }
    }
}

pub struct Engine {
    config: RagConfig,
    generator: Arc<EmbeddingGenerator>,
    index: Arc<VectorIndex>,
    counter: Arc<dyn TokenCounter>,
    resolver: Arc<dyn PathResolver>,
    chunker: ConversationChunker,
    retrieval: RetrievalController,
    debouncer: Debouncer,
}

impl Engine {
    /// Production wiring: local ONNX model, tokenizer-backed counter when
    /// available, data files under the configured or platform data directory.
    pub fn from_config(config: RagConfig) -> Self {
        let generator = Arc::new(EmbeddingGenerator::from_config(&config.embedding));
        let counter = create_token_counter(&config.embedding.resolved_cache_dir());
        let resolver = Arc::new(DataDirResolver::new(config.data_dir()));
        Self::with_parts(config, generator, counter, resolver)
    }

    pub fn with_parts(
        config: RagConfig,
        generator: Arc<EmbeddingGenerator>,
        counter: Arc<dyn TokenCounter>,
        resolver: Arc<dyn PathResolver>,
    ) -> Self {
        let index = Arc::new(VectorIndex::new(IndexOptions::from(&config.index)));
        let chunker = ConversationChunker::new(ChunkerOptions::from(&config.chunking), Arc::clone(&counter));
        let retrieval = RetrievalController::new(Arc::clone(&generator), Arc::clone(&index), Arc::clone(&counter));
        let debouncer = Debouncer::new(Duration::from_millis(config.ingest.debounce_ms));
        Self {
            config,
            generator,
            index,
            counter,
            resolver,
            chunker,
            retrieval,
            debouncer,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn generator(&self) -> &Arc<EmbeddingGenerator> {
        &self.generator
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn token_counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Where the index snapshot lives.
    pub fn index_path(&self) -> PathBuf {
        self.resolver.resolve(&self.config.storage.index_file)
    }

    // ── Index operations ─────────────────────────────────────────────────────

    pub async fn initialize_index(&self, dimensions: usize, max_elements: usize) -> Result<(), IndexError> {
        self.index.initialize(dimensions, max_elements).await
    }

    /// Load the saved index if there is one, otherwise start an empty one.
    pub async fn ensure_index(&self) -> Result<(), IndexError> {
        if self.index.is_initialized() {
            return Ok(());
        }
        if self.load_index().await? {
            return Ok(());
        }
        self.index
            .initialize(self.config.index.dimensions, self.config.index.max_elements)
            .await
    }

    pub async fn add_to_index(&self, vector: Vec<f32>, chunk: Chunk) -> Result<usize, IndexError> {
        self.index.insert(vector, chunk).await
    }

    pub async fn add_batch_to_index(&self, entries: Vec<(Vec<f32>, Chunk)>) -> Result<Vec<usize>, IndexError> {
        self.index.insert_batch(entries).await
    }

    pub fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<RetrievalResult>, IndexError> {
        self.index.search(query, k, min_score)
    }

    pub async fn save_index(&self) -> Result<PathBuf, IndexError> {
        self.index.save(&self.index_path()).await
    }

    pub async fn load_index(&self) -> Result<bool, IndexError> {
        self.index.load(&self.index_path()).await
    }

    pub async fn clear_index(&self) -> Result<(), IndexError> {
        self.index.clear().await
    }

    pub async fn remove_session(&self, session_id: &str) -> Result<usize, IndexError> {
        self.index.remove_session(session_id).await
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    // ── Ingestion ────────────────────────────────────────────────────────────

    /// Chunk, embed and index a conversation, then persist the index.
    ///
    /// Never fails: problems are reported through `success`/`reason`.
    pub async fn process_conversation_history(&self, session_id: &str, turns: &[Turn]) -> IngestReport {
        if session_id.trim().is_empty() {
            return IngestReport::rejected("invalid_session_id", None);
        }
        if turns.is_empty() {
            return IngestReport::rejected("no_turns", None);
        }

        let chunks = self.chunker.chunk(session_id, turns);
        if chunks.is_empty() {
            info!(session_id, turns = turns.len(), "conversation too short to chunk");
            return IngestReport {
                success: true,
                reason: Some("no_chunks".into()),
                ..Default::default()
            };
        }

        if let Err(e) = self.ensure_index().await {
            warn!(session_id, error = %e, "index unavailable for ingestion");
            return IngestReport::rejected("index_unavailable", Some(e.to_string()));
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = match self.generator.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(session_id, error = %e, "embedding chunks failed");
                return IngestReport::rejected("embedding_failed", Some(e.to_string()));
            }
        };

        let chunks_processed = chunks.len();
        let entries = vectors.into_iter().zip(chunks).collect();
        let index_ids = match self.index.insert_batch(entries).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(session_id, error = %e, "indexing chunks failed");
                return IngestReport::rejected("index_failed", Some(e.to_string()));
            }
        };

        if let Err(e) = self.save_index().await {
            warn!(session_id, error = %e, "index updated in memory but not saved");
        }

        info!(session_id, chunks = chunks_processed, "conversation ingested");
        IngestReport {
            success: true,
            chunks_processed,
            index_ids,
            ..Default::default()
        }
    }

    /// Ingest `turns` after the debounce delay, superseding any ingestion
    /// still waiting for the same session.
    ///
    /// The handle yields `None` when a later call replaced this one.
    pub fn schedule_ingest(self: &Arc<Self>, session_id: &str, turns: Vec<Turn>) -> JoinHandle<Option<IngestReport>> {
        let engine = Arc::clone(self);
        let session = session_id.to_string();
        self.debouncer.schedule(session_id, move || async move {
            engine.process_conversation_history(&session, &turns).await
        })
    }

    /// Drop a pending debounced ingestion; true if one was waiting.
    pub fn cancel_ingest(&self, session_id: &str) -> bool {
        self.debouncer.cancel(session_id)
    }

    // ── Retrieval ────────────────────────────────────────────────────────────

    /// Context for `question`; `options` default to the `[retrieval]` config.
    pub async fn retrieve_context(
        &self,
        question: &str,
        session_id: Option<&str>,
        options: Option<&RetrievalOptions>,
    ) -> RetrievalOutcome {
        match options {
            Some(options) => self.retrieval.retrieve(question, session_id, options).await,
            None => {
                let defaults = RetrievalOptions::from(&self.config.retrieval);
                self.retrieval.retrieve(question, session_id, &defaults).await
            }
        }
    }
}
