#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use convo_rag::config::RagConfig;
use convo_rag::embedding::{l2_normalize, EmbeddingGenerator, EmbeddingProvider, GeneratorOptions, EMBEDDING_DIM};
use convo_rag::index::{IndexOptions, VectorIndex};
use convo_rag::paths::DataDirResolver;
use convo_rag::tokens::EstimateTokenCounter;
use convo_rag::{Chunk, Engine, Turn};
use rand::Rng;
use tempfile::TempDir;

/// Deterministic bag-of-words embedder: every lowercase word adds weight to a
/// hashed bucket. Texts sharing words get high cosine similarity.
pub struct HashEmbedder;

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % EMBEDDING_DIM as u64) as usize] += 1.0;
        }
        // keep stop-word-only text off the zero vector
        v[0] += 0.01;
        Ok(l2_normalize(&v))
    }
}

/// Fast generator options for tests.
pub fn test_options() -> GeneratorOptions {
    GeneratorOptions {
        load_timeout: Duration::from_secs(5),
        embed_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(10),
        batch_size: 4,
        dimensions: EMBEDDING_DIM,
    }
}

pub fn hash_generator() -> Arc<EmbeddingGenerator> {
    Arc::new(EmbeddingGenerator::with_provider(Arc::new(HashEmbedder), test_options()))
}

/// Random vector of length `dim` with unit L2 norm.
pub fn random_unit_vector(dim: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    l2_normalize(&v)
}

/// Unit vector with a single spike at `seed`.
pub fn spike(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed % EMBEDDING_DIM] = 1.0;
    v
}

pub fn chunk(session: &str, text: &str) -> Chunk {
    Chunk::from_text(session, text, text.chars().count().div_ceil(4))
}

/// Index with the default 384 dimensions and `max_elements` capacity.
pub async fn test_index(max_elements: usize) -> VectorIndex {
    let options = IndexOptions {
        max_elements,
        ..Default::default()
    };
    let index = VectorIndex::new(options);
    index.initialize(EMBEDDING_DIM, max_elements).await.unwrap();
    index
}

/// Alternating interviewer/candidate turns built from `messages`.
pub fn turns(messages: &[&str]) -> Vec<Turn> {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let speaker = if i % 2 == 0 { "interviewer" } else { "candidate" };
            Turn::new(speaker, *m)
        })
        .collect()
}

/// An engine with the hashing embedder and a temporary data directory.
/// Keep the returned `TempDir` alive for the duration of the test.
pub fn test_engine() -> (Arc<Engine>, TempDir) {
    test_engine_with(RagConfig::default())
}

pub fn test_engine_with(config: RagConfig) -> (Arc<Engine>, TempDir) {
    engine_with_generator(config, hash_generator())
}

pub fn engine_with_generator(mut config: RagConfig, generator: Arc<EmbeddingGenerator>) -> (Arc<Engine>, TempDir) {
    let tmp = TempDir::new().unwrap();
    config.storage.data_dir = tmp.path().display().to_string();
    let resolver = Arc::new(DataDirResolver::new(Some(PathBuf::from(tmp.path()))));
    let engine = Engine::with_parts(config, generator, Arc::new(EstimateTokenCounter), resolver);
    (Arc::new(engine), tmp)
}

/// Embeds every text to the same vector, optionally after a delay.
pub struct FixedProvider {
    pub vector: Vec<f32>,
    pub delay: Duration,
}

impl EmbeddingProvider for FixedProvider {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        std::thread::sleep(self.delay);
        Ok(self.vector.clone())
    }
}

pub fn fixed_generator(vector: Vec<f32>, delay: Duration) -> Arc<EmbeddingGenerator> {
    Arc::new(EmbeddingGenerator::with_provider(
        Arc::new(FixedProvider { vector, delay }),
        test_options(),
    ))
}

/// Unit vector whose cosine similarity with `spike(0)` is `score`.
pub fn vector_scoring(score: f32, axis: usize) -> Vec<f32> {
    assert!(axis % EMBEDDING_DIM != 0);
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[0] = score;
    v[axis % EMBEDDING_DIM] = (1.0 - score * score).max(0.0).sqrt();
    v
}

/// A mock interview transcript covering a few distinct topics.
pub fn interview_transcript() -> Vec<Turn> {
    turns(&[
        "Tell me about your experience with distributed databases.",
        "I spent three years running Cassandra clusters for payment processing.",
        "How did you handle replication across regions?",
        "We used quorum writes with local datacenter consistency for replication.",
        "What salary range are you expecting for this position?",
        "My salary expectation is between 150 and 170 thousand dollars.",
        "Do you have experience with Kubernetes deployments?",
        "Yes, I migrated our services to Kubernetes with Helm charts.",
        "What about on-call rotations and incident response?",
        "I led incident response and wrote our on-call runbooks.",
        "Why are you leaving your current company?",
        "I want to work on larger scale search infrastructure.",
    ])
}
