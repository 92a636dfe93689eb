//! Question-to-context retrieval.
//!
//! A question is gated by [`classify`], embedded, searched against the index,
//! narrowed by the hybrid top-K/threshold rule, trimmed to a token budget and
//! rendered for the prompt builder. Every failure on the way comes back as a
//! fallback [`RetrievalOutcome`] instead of an error.

pub mod classify;
pub mod format;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

pub use classify::{classify, QueryKind, Strategy};
pub use format::{escape_xml, format_context, ContextFormat};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingGenerator;
use crate::error::{IndexError, RetrievalError};
use crate::index::VectorIndex;
use crate::tokens::TokenCounter;
use crate::types::RetrievalResult;

/// Per-call retrieval knobs. Defaults come from `[retrieval]` in the config.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub min_score: f32,
    pub min_results: usize,
    pub max_tokens: usize,
    pub timeout: Duration,
    pub format: ContextFormat,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrievalOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_score: config.min_score,
            min_results: config.min_results,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            format: config.format,
        }
    }
}

/// Result of one retrieval attempt, in the shape the prompt builder consumes.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalOutcome {
    #[serde(rename = "usedRAG")]
    pub used_rag: bool,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<RetrievalResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_score: Option<f32>,
    /// Set when some returned chunk scores under the threshold. Both this and
    /// `below_threshold_count` describe `chunks` after the token budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_confidence: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub below_threshold_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetrievalOutcome {
    fn skipped(kind: QueryKind) -> Self {
        Self {
            skipped: Some(true),
            strategy: Some(Strategy::Direct),
            query_type: Some(kind),
            reason: Some("creative_query".into()),
            ..Default::default()
        }
    }

    fn fallback(kind: Option<QueryKind>, reason: &str, error: Option<String>) -> Self {
        Self {
            fallback: true,
            strategy: kind.map(QueryKind::strategy),
            query_type: kind,
            reason: Some(reason.to_string()),
            error,
            ..Default::default()
        }
    }

    fn from_error(kind: Option<QueryKind>, err: &RetrievalError) -> Self {
        Self::fallback(kind, err.reason(), Some(err.to_string()))
    }
}

/// Candidates kept by [`select_hybrid`].
#[derive(Debug, Clone)]
pub struct Selection {
    pub results: Vec<RetrievalResult>,
    pub low_confidence: bool,
    pub below_threshold_count: usize,
}

/// Top-K plus threshold with a minimum-result guarantee.
///
/// `candidates` must be sorted by descending score. When at least
/// `min_results` candidates clear `min_score`, exactly those are kept.
/// Otherwise the best `min_results` are kept regardless of score and the
/// selection is flagged low-confidence.
pub fn select_hybrid(candidates: Vec<RetrievalResult>, min_score: f32, min_results: usize) -> Selection {
    let above = candidates.iter().filter(|r| r.score >= min_score).count();
    if above >= min_results {
        let results = candidates.into_iter().filter(|r| r.score >= min_score).collect();
        return Selection {
            results,
            low_confidence: false,
            below_threshold_count: 0,
        };
    }

    let results: Vec<RetrievalResult> = candidates.into_iter().take(min_results).collect();
    let below_threshold_count = results.iter().filter(|r| r.score < min_score).count();
    Selection {
        results,
        low_confidence: true,
        below_threshold_count,
    }
}

/// Keep results in order until the next one would push the total past `max_tokens`.
///
/// Returns the kept results and the tokens they use.
pub fn apply_token_budget(
    results: Vec<RetrievalResult>,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> (Vec<RetrievalResult>, usize) {
    let mut used = 0;
    let mut kept = Vec::with_capacity(results.len());
    for result in results {
        let tokens = counter.count_tokens(&result.chunk.text);
        if used + tokens > max_tokens {
            break;
        }
        used += tokens;
        kept.push(result);
    }
    (kept, used)
}

pub struct RetrievalController {
    generator: Arc<EmbeddingGenerator>,
    index: Arc<VectorIndex>,
    counter: Arc<dyn TokenCounter>,
}

impl RetrievalController {
    pub fn new(
        generator: Arc<EmbeddingGenerator>,
        index: Arc<VectorIndex>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            generator,
            index,
            counter,
        }
    }

    /// Build context for `question`, optionally scoped to one session.
    ///
    /// Never fails: errors, timeouts and empty results all come back as
    /// fallback outcomes with a reason code.
    pub async fn retrieve(
        &self,
        question: &str,
        session_id: Option<&str>,
        options: &RetrievalOptions,
    ) -> RetrievalOutcome {
        if question.trim().is_empty() {
            return RetrievalOutcome::from_error(None, &RetrievalError::InvalidQuestion);
        }

        let kind = classify(question);
        if kind.skips_retrieval() {
            debug!(query_type = kind.as_str(), "retrieval skipped");
            return RetrievalOutcome::skipped(kind);
        }

        let attempt = self.try_retrieve(question, session_id, options, kind);
        let outcome = match tokio::time::timeout(options.timeout, attempt).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => RetrievalOutcome::from_error(Some(kind), &e),
            Err(_) => RetrievalOutcome::from_error(Some(kind), &RetrievalError::Timeout(options.timeout)),
        };

        if outcome.fallback {
            warn!(
                reason = outcome.reason.as_deref().unwrap_or_default(),
                error = outcome.error.as_deref().unwrap_or_default(),
                "retrieval fell back"
            );
        }
        outcome
    }

    async fn try_retrieve(
        &self,
        question: &str,
        session_id: Option<&str>,
        options: &RetrievalOptions,
        kind: QueryKind,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        if session_id.is_some_and(|s| s.trim().is_empty()) {
            return Err(RetrievalError::InvalidSessionId);
        }
        if !self.index.is_initialized() {
            return Err(IndexError::NotInitialized.into());
        }

        let query = self.generator.embed(question).await?;
        let candidates = self.index.search_scoped(&query, options.top_k, 0.0, session_id)?;
        if candidates.is_empty() {
            return Ok(RetrievalOutcome::fallback(Some(kind), "no_results", None));
        }
        let fetched = candidates.len();

        let selection = select_hybrid(candidates, options.min_score, options.min_results);
        let (chunks, tokens_used) =
            apply_token_budget(selection.results, options.max_tokens, self.counter.as_ref());
        if chunks.is_empty() {
            return Ok(RetrievalOutcome::fallback(Some(kind), "token_budget_exhausted", None));
        }

        let avg_score = chunks.iter().map(|r| r.score).sum::<f32>() / chunks.len() as f32;
        let context = format_context(&chunks, options.format);
        let below_threshold_count = chunks.iter().filter(|r| r.score < options.min_score).count();
        let low_confidence = below_threshold_count > 0;

        info!(
            query_type = kind.as_str(),
            fetched,
            returned = chunks.len(),
            tokens_used,
            avg_score,
            selected_low_confidence = selection.low_confidence,
            low_confidence,
            "context retrieved"
        );

        Ok(RetrievalOutcome {
            used_rag: true,
            fallback: false,
            strategy: Some(Strategy::Rag),
            query_type: Some(kind),
            context: Some(context),
            chunks: Some(chunks),
            tokens_used: Some(tokens_used),
            avg_score: Some(avg_score),
            low_confidence: Some(low_confidence),
            below_threshold_count: Some(below_threshold_count),
            ..Default::default()
        })
    }
}
