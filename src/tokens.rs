//! Token counting used for chunk sizing and context budgets.
//!
//! [`EstimateTokenCounter`] is the fallback (4 characters per token).
//! [`TokenizerCounter`] counts with the embedding model's own tokenizer when
//! `tokenizer.json` is available.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokenizers::Tokenizer;

/// Characters per token for the estimate counter.
const CHARS_PER_TOKEN: usize = 4;

/// Counts model tokens. Implementations must be deterministic and monotonic
/// in text length.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    fn count_tokens_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.count_tokens(t)).collect()
    }

    /// Longest prefix of `text` (on a char boundary) that fits in `limit` tokens.
    fn truncate_to_token_limit(&self, text: &str, limit: usize) -> String {
        if self.count_tokens(text) <= limit {
            return text.to_string();
        }
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        // Binary search over char boundaries; relies on monotonicity.
        let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.count_tokens(&text[..boundaries[mid]]) <= limit {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        text[..boundaries[lo]].to_string()
    }

    fn exceeds_token_limit(&self, text: &str, limit: usize) -> bool {
        self.count_tokens(text) > limit
    }
}

/// `ceil(chars / 4)` estimate.
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimateTokenCounter;

impl TokenCounter for EstimateTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

/// Exact counts from a HuggingFace tokenizer (no special tokens).
pub struct TokenizerCounter {
    tokenizer: Tokenizer,
}

impl TokenizerCounter {
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        Ok(Self { tokenizer })
    }
}

impl TokenCounter for TokenizerCounter {
    fn count_tokens(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.get_ids().len(),
            Err(e) => {
                tracing::warn!(error = %e, "tokenizer failed, falling back to estimate");
                EstimateTokenCounter.count_tokens(text)
            }
        }
    }
}

/// Pick the accurate counter when the tokenizer is present in `cache_dir`,
/// otherwise the estimate.
pub fn create_token_counter(cache_dir: &Path) -> Arc<dyn TokenCounter> {
    let tokenizer_path = cache_dir.join("tokenizer.json");
    if tokenizer_path.exists() {
        match TokenizerCounter::from_file(&tokenizer_path) {
            Ok(counter) => {
                tracing::debug!(tokenizer = %tokenizer_path.display(), "using tokenizer token counts");
                return Arc::new(counter);
            }
            Err(e) => tracing::warn!(error = %e, "tokenizer unusable, estimating tokens"),
        }
    }
    Arc::new(EstimateTokenCounter)
}
