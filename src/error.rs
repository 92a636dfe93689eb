//! Typed errors for the embedding, index, and retrieval layers.
//!
//! Low-level components return these with causal messages. The retrieval
//! controller and the ingestion entry point convert them into structured
//! result objects, so none of them cross the engine boundary.

use std::time::Duration;

use thiserror::Error;

/// Failures from the embedding pipeline.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("text to embed must not be empty")]
    EmptyText,

    #[error("embedding model load timed out after {0:?}")]
    LoadTimeout(Duration),

    #[error("embedding model failed to load after {attempts} attempt(s): {message}")]
    Load { attempts: u32, message: String },

    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding has wrong dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding contains NaN or infinite values")]
    NonFinite,

    #[error("embedding inference failed: {0}")]
    Inference(String),

    #[error("batch item {index} failed: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<EmbeddingError>,
    },
}

/// Failures from the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index is not initialized")]
    NotInitialized,

    #[error("vector has wrong dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("invalid index parameters: {0}")]
    InvalidParameters(String),

    #[error("index capacity exceeded: {current} stored + {requested} requested > {max} max")]
    CapacityExceeded {
        current: usize,
        requested: usize,
        max: usize,
    },

    #[error("timed out after {0:?} waiting for the index write lock")]
    LockTimeout(Duration),

    #[error("persisted index is corrupt: {0}")]
    Corrupt(String),

    #[error("index I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("index serialization failed: {0}")]
    Serialization(String),
}

/// Failures inside a retrieval attempt, before conversion to a fallback result.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("question must not be empty")]
    InvalidQuestion,

    #[error("session id must not be blank")]
    InvalidSessionId,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("retrieval timed out after {0:?}")]
    Timeout(Duration),
}

impl RetrievalError {
    /// Stable snake_case reason code reported to collaborators.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidQuestion => "invalid_question",
            Self::InvalidSessionId => "invalid_session_id",
            Self::Embedding(_) => "embedding_failed",
            Self::Index(IndexError::NotInitialized) => "index_not_initialized",
            Self::Index(_) => "search_failed",
            Self::Timeout(_) => "timeout",
        }
    }
}
