//! Serialization of retrieved chunks for the prompt builder.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::types::RetrievalResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextFormat {
    #[default]
    Xml,
    Plain,
}

impl std::str::FromStr for ContextFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Ok(Self::Xml),
            "plain" | "text" => Ok(Self::Plain),
            other => Err(format!("unknown context format '{other}' (expected xml or plain)")),
        }
    }
}

pub fn format_context(results: &[RetrievalResult], format: ContextFormat) -> String {
    match format {
        ContextFormat::Xml => format_xml(results),
        ContextFormat::Plain => format_plain(results),
    }
}

/// Chunk texts separated by a blank line.
pub fn format_plain(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|r| r.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `<retrieved_context>` with one 1-indexed `<document>` per result.
pub fn format_xml(results: &[RetrievalResult]) -> String {
    let mut out = String::from("<retrieved_context>\n");
    for (i, result) in results.iter().enumerate() {
        // writing to a String cannot fail
        let _ = writeln!(
            out,
            "<document id=\"{}\" relevance=\"{:.2}\">{}</document>",
            i + 1,
            result.score,
            escape_xml(&result.chunk.text)
        );
    }
    out.push_str("</retrieved_context>");
    out
}

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
