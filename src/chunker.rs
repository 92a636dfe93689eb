//! Sliding-window chunking of speaker-tagged turns.
//!
//! Windows of `turns_per_chunk` turns advance by `turns_per_chunk - overlap`
//! turns, so neighbouring chunks share context across their boundary. A window
//! whose rendered text exceeds `max_tokens_per_chunk` is re-chunked with a
//! window 30% smaller (never below two turns); the pieces are flagged
//! `was_split` and point back at the oversized window.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ChunkingConfig;
use crate::tokens::{EstimateTokenCounter, TokenCounter};
use crate::types::{Chunk, Turn};

/// Windows never hold fewer turns than this.
const MIN_TURNS: usize = 2;

/// Window shrink factor applied to oversized windows.
const SPLIT_FACTOR: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct ChunkerOptions {
    pub turns_per_chunk: usize,
    pub overlap_percent: f64,
    pub max_tokens_per_chunk: usize,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self::from(&ChunkingConfig::default())
    }
}

impl From<&ChunkingConfig> for ChunkerOptions {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            turns_per_chunk: config.turns_per_chunk,
            overlap_percent: config.overlap_percent,
            max_tokens_per_chunk: config.max_tokens_per_chunk,
        }
        .normalized()
    }
}

impl ChunkerOptions {
    /// Clamp into the range the window loop relies on: at least two turns
    /// per window and an overlap that always leaves a positive step.
    pub fn normalized(self) -> Self {
        let overlap_percent = if self.overlap_percent.is_finite() {
            self.overlap_percent.clamp(0.0, 0.9)
        } else {
            0.0
        };
        Self {
            turns_per_chunk: self.turns_per_chunk.max(MIN_TURNS),
            overlap_percent,
            max_tokens_per_chunk: self.max_tokens_per_chunk,
        }
    }

    /// `ceil(turns_per_chunk * overlap_percent)` for the default window size.
    pub fn overlap_turns(&self) -> usize {
        overlap_for(self.turns_per_chunk, self.overlap_percent)
    }

    /// Turns the window advances between chunks.
    pub fn step(&self) -> usize {
        self.turns_per_chunk - self.overlap_turns()
    }
}

fn overlap_for(turns_per_chunk: usize, overlap_percent: f64) -> usize {
    // epsilon keeps 5 * 0.2 from ceiling to 2
    let raw = (turns_per_chunk as f64 * overlap_percent - 1e-9).ceil().max(0.0) as usize;
    raw.min(turns_per_chunk.saturating_sub(1))
}

fn shrink(turns_per_chunk: usize) -> usize {
    ((turns_per_chunk as f64 * SPLIT_FACTOR).floor() as usize).max(MIN_TURNS)
}

pub struct ConversationChunker {
    options: ChunkerOptions,
    counter: Arc<dyn TokenCounter>,
}

impl ConversationChunker {
    pub fn new(options: ChunkerOptions, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            options: options.normalized(),
            counter,
        }
    }

    /// Chunker using the 4-chars-per-token estimate.
    pub fn with_estimate(options: ChunkerOptions) -> Self {
        Self::new(options, Arc::new(EstimateTokenCounter))
    }

    pub fn options(&self) -> &ChunkerOptions {
        &self.options
    }

    /// Split `turns` into overlapping chunks for `session_id`.
    ///
    /// Blank turns are dropped first. Fewer than two usable turns yield no chunks.
    pub fn chunk(&self, session_id: &str, turns: &[Turn]) -> Vec<Chunk> {
        let valid: Vec<&Turn> = turns.iter().filter(|t| t.is_valid()).collect();
        if valid.len() < turns.len() {
            debug!(dropped = turns.len() - valid.len(), "skipping blank turns");
        }
        if valid.len() < MIN_TURNS {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        self.chunk_window(
            session_id,
            &valid,
            0,
            self.options.turns_per_chunk,
            None,
            &mut chunks,
        );
        debug!(session_id, turns = valid.len(), chunks = chunks.len(), "conversation chunked");
        chunks
    }

    fn chunk_window(
        &self,
        session_id: &str,
        turns: &[&Turn],
        offset: usize,
        turns_per_chunk: usize,
        parent: Option<usize>,
        out: &mut Vec<Chunk>,
    ) {
        let overlap = overlap_for(turns_per_chunk, self.options.overlap_percent);
        let step = turns_per_chunk - overlap;

        let mut start = 0;
        let mut window_index = 0;
        while turns.len() - start >= MIN_TURNS {
            let end = (start + turns_per_chunk).min(turns.len());
            let window = &turns[start..end];
            let text = window
                .iter()
                .map(|t| t.render())
                .collect::<Vec<_>>()
                .join("\n");
            let token_count = self.counter.count_tokens(&text);

            let oversized = token_count > self.options.max_tokens_per_chunk;
            let reduced = shrink(turns_per_chunk);
            if oversized && reduced < window.len() {
                debug!(
                    turns = window.len(),
                    token_count,
                    reduced,
                    "window over token budget, splitting"
                );
                self.chunk_window(
                    session_id,
                    window,
                    offset + start,
                    reduced,
                    parent.or(Some(window_index)),
                    out,
                );
            } else {
                if oversized {
                    warn!(
                        turns = window.len(),
                        token_count,
                        max = self.options.max_tokens_per_chunk,
                        "window cannot be split further, keeping it over budget"
                    );
                }
                let is_split = parent.is_some();
                out.push(Chunk {
                    text,
                    session_id: session_id.to_string(),
                    turn_range: [offset + start, offset + end - 1],
                    turn_count: window.len(),
                    speakers: distinct_speakers(window),
                    start_time: window.first().and_then(|t| t.timestamp),
                    end_time: window.last().and_then(|t| t.timestamp),
                    token_count,
                    has_overlap: is_split || window_index > 0,
                    overlap_turns: overlap,
                    was_split: is_split,
                    parent_chunk_index: parent,
                });
            }

            window_index += 1;
            if end == turns.len() {
                break;
            }
            start += step;
        }
    }
}

fn distinct_speakers(window: &[&Turn]) -> Vec<String> {
    let mut speakers: Vec<String> = Vec::new();
    for turn in window {
        let speaker = turn.speaker.trim();
        if !speakers.iter().any(|s| s == speaker) {
            speakers.push(speaker.to_string());
        }
    }
    speakers
}
