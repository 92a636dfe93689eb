//! Core record types shared by the chunker, index, and retrieval layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One speaker-tagged message from a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn new(speaker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            message: message.into(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// A turn is usable only with a non-blank speaker and message.
    pub fn is_valid(&self) -> bool {
        !self.speaker.trim().is_empty() && !self.message.trim().is_empty()
    }

    /// `"speaker: message"` line used in chunk text.
    pub fn render(&self) -> String {
        format!("{}: {}", self.speaker.trim(), self.message.trim())
    }
}

/// A window of consecutive turns, embedded and indexed as one unit.
///
/// Chunks are immutable once built. The JSON form is what the index sidecar
/// stores, so field names are camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub text: String,
    pub session_id: String,
    /// Inclusive `[start, end]` indexes into the valid input turns.
    pub turn_range: [usize; 2],
    pub turn_count: usize,
    /// Distinct speakers in first-appearance order.
    pub speakers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub token_count: usize,
    pub has_overlap: bool,
    pub overlap_turns: usize,
    #[serde(default)]
    pub was_split: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_chunk_index: Option<usize>,
}

impl Chunk {
    /// Bare chunk for callers that index free text rather than turns.
    pub fn from_text(session_id: impl Into<String>, text: impl Into<String>, token_count: usize) -> Self {
        Self {
            text: text.into(),
            session_id: session_id.into(),
            turn_range: [0, 0],
            turn_count: 1,
            speakers: Vec::new(),
            start_time: None,
            end_time: None,
            token_count,
            has_overlap: false,
            overlap_turns: 0,
            was_split: false,
            parent_chunk_index: None,
        }
    }
}

/// One ranked hit from a similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    /// Index id of the matched entry.
    pub id: usize,
    /// Similarity in `[0, 1]`.
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
    pub chunk: Chunk,
}
