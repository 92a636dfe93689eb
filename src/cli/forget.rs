//! CLI `forget` command: purge one session from the index.

use anyhow::{Context, Result};

use convo_rag::config::RagConfig;

pub async fn forget(config: RagConfig, session: &str) -> Result<()> {
    let engine = super::open_engine(config).await?;

    let removed = engine.remove_session(session).await?;
    if removed == 0 {
        println!("No chunks found for session '{session}'.");
        return Ok(());
    }

    let path = engine.save_index().await.context("failed to save index")?;
    println!(
        "Removed {removed} chunk(s) for session '{session}'. {} remain in {}.",
        engine.index_stats().num_elements,
        path.display()
    );
    Ok(())
}
