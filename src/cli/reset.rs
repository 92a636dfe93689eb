//! CLI `reset` command: empty the index after user confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use convo_rag::config::RagConfig;

/// Discard every indexed chunk after user confirmation.
pub async fn reset(config: RagConfig, yes: bool) -> Result<()> {
    let engine = super::open_engine(config).await?;
    let path = engine.index_path();

    if !yes {
        println!("WARNING: This will permanently delete ALL indexed conversation chunks.");
        println!("Index: {}", path.display());
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "YES" {
            bail!("reset cancelled");
        }
    }

    let removed = engine.index_stats().num_elements;
    engine.clear_index().await?;
    engine.save_index().await?;

    println!("Removed {removed} chunk(s). Index reset complete.");
    Ok(())
}
