//! CLI `ingest` command: chunk, embed and index a transcript file.

use anyhow::{bail, Context, Result};
use std::path::Path;

use convo_rag::config::RagConfig;
use convo_rag::Turn;

/// Index the turns in `file` (a JSON array of `{speaker, message, timestamp?}`).
pub async fn ingest(config: RagConfig, file: &Path, session: &str) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let turns: Vec<Turn> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of turns", file.display()))?;

    let engine = super::open_engine(config).await?;
    let report = engine.process_conversation_history(session, &turns).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success {
        bail!(
            "ingest failed: {}",
            report.error.as_deref().or(report.reason.as_deref()).unwrap_or("unknown")
        );
    }
    Ok(())
}
