//! On-device conversational RAG: turn transcripts into a searchable knowledge
//! base and serve token-budgeted context to a prompt builder.
//!
//! Conversations arrive as speaker-tagged turns. The write path chunks them
//! into overlapping windows, embeds each chunk locally and appends it to an
//! HNSW index that is persisted as a binary graph file plus a JSON sidecar.
//! The read path gates a question, embeds it, runs a hybrid top-K/threshold
//! search and renders the surviving chunks within a token budget.
//!
//! # Architecture
//!
//! - **Embeddings**: Local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions),
//!   behind a lazily loaded, retrying [`EmbeddingGenerator`]
//! - **Index**: `hnsw_rs` cosine graph with serialized writes and concurrent reads
//! - **Persistence**: `bincode` vectors + JSON chunk metadata, rebuilt on load
//! - **Retrieval**: query gating, minimum-result guarantee, token budgeting,
//!   XML or plain context, structured fallbacks instead of errors
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`embedding`]: Text-to-vector embedding pipeline via ONNX Runtime
//! - [`chunker`]: Sliding-window chunking of conversation turns
//! - [`index`]: Concurrent vector index and its on-disk snapshot format
//! - [`retrieval`]: Query classification, hybrid selection and context formatting
//! - [`engine`]: The owned bundle of all of the above

pub mod chunker;
pub mod config;
pub mod debounce;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod paths;
pub mod retrieval;
pub mod tokens;
pub mod types;

pub use embedding::EmbeddingGenerator;
pub use engine::{Engine, IngestReport};
pub use error::{EmbeddingError, IndexError, RetrievalError};
pub use index::VectorIndex;
pub use retrieval::{RetrievalOptions, RetrievalOutcome};
pub use types::{Chunk, RetrievalResult, Turn};
