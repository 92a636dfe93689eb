//! Lifecycle wrapper around one embedding provider.
//!
//! The first [`EmbeddingGenerator::initialize`] call loads the model on the
//! blocking pool under a timeout; concurrent callers wait on the same init
//! lock and receive the same handle. A failed load is retried once after a
//! short backoff. Every embed call is bounded by its own timeout and the output
//! is checked for length and finiteness before it is returned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Builds a provider. Runs on the blocking pool.
pub type ProviderLoader =
    Arc<dyn Fn() -> anyhow::Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;

const LOAD_ATTEMPTS: u32 = 2;

/// Timeouts and batching knobs for [`EmbeddingGenerator`].
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub load_timeout: Duration,
    pub embed_timeout: Duration,
    pub retry_backoff: Duration,
    pub batch_size: usize,
    pub dimensions: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            embed_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(500),
            batch_size: 32,
            dimensions: EMBEDDING_DIM,
        }
    }
}

impl From<&EmbeddingConfig> for GeneratorOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            load_timeout: config.load_timeout(),
            embed_timeout: config.embed_timeout(),
            retry_backoff: config.retry_backoff(),
            batch_size: config.batch_size.max(1),
            dimensions: EMBEDDING_DIM,
        }
    }
}

pub struct EmbeddingGenerator {
    loader: ProviderLoader,
    pipeline: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
    options: GeneratorOptions,
    loads: AtomicUsize,
}

impl EmbeddingGenerator {
    pub fn new(loader: ProviderLoader, options: GeneratorOptions) -> Self {
        Self {
            loader,
            pipeline: Mutex::new(None),
            options,
            loads: AtomicUsize::new(0),
        }
    }

    /// Generator backed by the configured provider (see [`super::create_provider`]).
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let provider_config = config.clone();
        let loader: ProviderLoader = Arc::new(move || {
            let provider = super::create_provider(&provider_config)?;
            Ok(Arc::from(provider))
        });
        Self::new(loader, GeneratorOptions::from(config))
    }

    /// Generator around an already-constructed provider.
    pub fn with_provider(provider: Arc<dyn EmbeddingProvider>, options: GeneratorOptions) -> Self {
        let loader: ProviderLoader = Arc::new(move || Ok(Arc::clone(&provider)));
        Self::new(loader, options)
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Number of successful model loads so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub async fn is_initialized(&self) -> bool {
        self.pipeline.lock().await.is_some()
    }

    /// Load the model if needed and return the shared pipeline handle.
    pub async fn initialize(&self) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
        let mut slot = self.pipeline.lock().await;
        if let Some(provider) = slot.as_ref() {
            return Ok(Arc::clone(provider));
        }

        let mut attempt = 1;
        loop {
            match self.load_once().await {
                Ok(provider) => {
                    self.loads.fetch_add(1, Ordering::SeqCst);
                    info!(attempt, "embedding pipeline ready");
                    *slot = Some(Arc::clone(&provider));
                    return Ok(provider);
                }
                Err(e) if attempt < LOAD_ATTEMPTS => {
                    warn!(attempt, error = %e, "embedding model load failed, retrying");
                    tokio::time::sleep(self.options.retry_backoff).await;
                    attempt += 1;
                }
                Err(EmbeddingError::Load { message, .. }) => {
                    return Err(EmbeddingError::Load {
                        attempts: attempt,
                        message,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop the pipeline; the next [`initialize`](Self::initialize) reloads it.
    pub async fn teardown(&self) {
        let mut slot = self.pipeline.lock().await;
        if slot.take().is_some() {
            info!("embedding pipeline released");
        }
    }

    async fn load_once(&self) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
        let loader = Arc::clone(&self.loader);
        let handle = tokio::task::spawn_blocking(move || loader());
        match tokio::time::timeout(self.options.load_timeout, handle).await {
            Err(_) => Err(EmbeddingError::LoadTimeout(self.options.load_timeout)),
            Ok(Err(join)) => Err(EmbeddingError::Load {
                attempts: 1,
                message: join.to_string(),
            }),
            Ok(Ok(Err(e))) => Err(EmbeddingError::Load {
                attempts: 1,
                message: format!("{e:#}"),
            }),
            Ok(Ok(Ok(provider))) => Ok(provider),
        }
    }

    /// Embed one text into a normalized vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }
        let provider = self.initialize().await?;
        let text = text.to_string();
        let vector = self.run_blocking(move || provider.embed(&text)).await?;
        self.validate(vector)
    }

    /// Embed many texts. `output[i]` always corresponds to `texts[i]`.
    ///
    /// Works in sub-batches of `batch_size`. When a sub-batch fails, its items
    /// are embedded one at a time; the call only fails if an item fails alone.
    pub async fn embed_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let provider = self.initialize().await?;
        let batch_size = self.options.batch_size.max(1);

        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_no, sub) in texts.chunks(batch_size).enumerate() {
            let owned: Vec<String> = sub.iter().map(|t| t.as_ref().to_string()).collect();
            match self.embed_sub_batch(&provider, owned.clone()).await {
                Ok(batch) => vectors.extend(batch),
                Err(e) => {
                    warn!(batch = batch_no, size = owned.len(), error = %e, "sub-batch failed, embedding items individually");
                    for (offset, text) in owned.iter().enumerate() {
                        let vector = self.embed(text).await.map_err(|source| {
                            EmbeddingError::BatchItem {
                                index: batch_no * batch_size + offset,
                                source: Box::new(source),
                            }
                        })?;
                        vectors.push(vector);
                    }
                }
            }
        }

        debug!(count = vectors.len(), "batch embedded");
        Ok(vectors)
    }

    async fn embed_sub_batch(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyText);
        }
        let expected = texts.len();
        let provider = Arc::clone(provider);
        let batch = self
            .run_blocking(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                provider.embed_batch(&refs)
            })
            .await?;

        if batch.len() != expected {
            return Err(EmbeddingError::Inference(format!(
                "model returned {} embeddings for {expected} inputs",
                batch.len()
            )));
        }
        batch.into_iter().map(|v| self.validate(v)).collect()
    }

    /// Run provider work on the blocking pool under the per-call timeout.
    ///
    /// On timeout the blocking task keeps running; only the wait is abandoned.
    async fn run_blocking<T, F>(&self, work: F) -> Result<T, EmbeddingError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(work);
        match tokio::time::timeout(self.options.embed_timeout, handle).await {
            Err(_) => Err(EmbeddingError::Timeout(self.options.embed_timeout)),
            Ok(Err(join)) => Err(EmbeddingError::Inference(join.to_string())),
            Ok(Ok(Err(e))) => Err(EmbeddingError::Inference(format!("{e:#}"))),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }

    fn validate(&self, vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        if vector.len() != self.options.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.options.dimensions,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstProvider {
        len: usize,
    }

    impl EmbeddingProvider for ConstProvider {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            let mut v = vec![0.0; self.len];
            if let Some(first) = v.first_mut() {
                *first = 1.0;
            }
            Ok(v)
        }
    }

    fn generator(len: usize) -> EmbeddingGenerator {
        EmbeddingGenerator::with_provider(Arc::new(ConstProvider { len }), GeneratorOptions::default())
    }

    #[tokio::test]
    async fn rejects_blank_text() {
        let gen = generator(EMBEDDING_DIM);
        assert!(matches!(gen.embed("   ").await, Err(EmbeddingError::EmptyText)));
        // validation happens before the model is touched
        assert_eq!(gen.load_count(), 0);
    }

    #[tokio::test]
    async fn wrong_length_output_is_rejected() {
        let gen = generator(10);
        let err = gen.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch { expected: 384, actual: 10 }
        ));
    }

    #[tokio::test]
    async fn teardown_allows_reload() {
        let gen = generator(EMBEDDING_DIM);
        gen.initialize().await.unwrap();
        assert!(gen.is_initialized().await);
        gen.teardown().await;
        assert!(!gen.is_initialized().await);
        gen.initialize().await.unwrap();
        assert_eq!(gen.load_count(), 2);
    }

    #[tokio::test]
    async fn empty_batch_skips_model_load() {
        let gen = generator(EMBEDDING_DIM);
        let out = gen.embed_batch::<&str>(&[]).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(gen.load_count(), 0);
    }
}
