//! Lexical query gating.
//!
//! Creative requests and opinion questions are answered directly by the
//! language model; everything else goes through retrieval.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Creative,
    Opinion,
    TimeSensitive,
    EntityRich,
    Factual,
    Ambiguous,
}

/// How a query should be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Direct,
    Rag,
}

impl QueryKind {
    pub fn strategy(self) -> Strategy {
        match self {
            Self::Creative | Self::Opinion => Strategy::Direct,
            _ => Strategy::Rag,
        }
    }

    pub fn skips_retrieval(self) -> bool {
        self.strategy() == Strategy::Direct
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creative => "creative",
            Self::Opinion => "opinion",
            Self::TimeSensitive => "time_sensitive",
            Self::EntityRich => "entity_rich",
            Self::Factual => "factual",
            Self::Ambiguous => "ambiguous",
        }
    }
}

const CREATIVE_VERBS: &[&str] = &[
    "write", "compose", "draft", "create", "generate", "imagine", "brainstorm", "invent",
    "design", "rewrite", "rephrase", "paraphrase", "poem", "story",
];

const POLITE_PREFIXES: &[&str] = &["please", "can you", "could you", "would you", "help me"];

const OPINION_PHRASES: &[&str] = &[
    "what do you think",
    "what's your opinion",
    "what is your opinion",
    "your opinion",
    "do you think",
    "do you prefer",
    "would you rather",
    "how do you feel",
    "in your view",
    "should i",
    "do you like",
    "your favorite",
    "your favourite",
];

const TIME_CUES: &[&str] = &[
    "when", "yesterday", "today", "earlier", "ago", "last time", "last week", "recently",
    "before", "after", "previous", "latest", "first time", "just now", "deadline",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "who", "where", "which", "why", "how", "did", "does", "do", "is", "are", "was",
    "were", "can", "list", "tell", "explain", "summarize", "remind",
];

/// Classify `question` by lexical cues. Blank input is ambiguous.
pub fn classify(question: &str) -> QueryKind {
    let lower = question.trim().to_lowercase();
    if lower.is_empty() {
        return QueryKind::Ambiguous;
    }

    if is_creative(&lower) {
        return QueryKind::Creative;
    }
    if OPINION_PHRASES.iter().any(|p| lower.contains(p)) {
        return QueryKind::Opinion;
    }

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    if TIME_CUES.iter().any(|cue| contains_phrase(&words, cue)) || words.iter().any(|w| looks_like_date(w)) {
        return QueryKind::TimeSensitive;
    }
    if has_entities(question) {
        return QueryKind::EntityRich;
    }
    if words.first().is_some_and(|w| QUESTION_WORDS.contains(w)) || lower.ends_with('?') {
        return QueryKind::Factual;
    }
    QueryKind::Ambiguous
}

fn is_creative(lower: &str) -> bool {
    let mut rest = lower;
    for prefix in POLITE_PREFIXES {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped.trim_start_matches([' ', ',']);
        }
    }
    let first = rest
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or_default();
    CREATIVE_VERBS.contains(&first)
        || (rest.starts_with("make up") || rest.starts_with("come up with"))
}

fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split(' ').collect();
    words.windows(parts.len()).any(|w| w == parts.as_slice())
}

fn looks_like_date(word: &str) -> bool {
    const MONTHS: &[&str] = &[
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december", "monday", "tuesday", "wednesday", "thursday",
        "friday", "saturday", "sunday",
    ];
    MONTHS.contains(&word) || (word.len() == 4 && word.starts_with("20") && word.chars().all(|c| c.is_ascii_digit()))
}

/// Capitalized words past the first, or any token with digits.
fn has_entities(question: &str) -> bool {
    question
        .split_whitespace()
        .skip(1)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty() && *w != "I")
        .any(|w| w.chars().next().is_some_and(char::is_uppercase) || w.chars().any(|c| c.is_ascii_digit()))
}
