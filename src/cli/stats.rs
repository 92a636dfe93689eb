use anyhow::Result;

use convo_rag::config::RagConfig;

/// Display index statistics in the terminal.
pub async fn stats(config: RagConfig) -> Result<()> {
    let engine = super::open_engine(config).await?;
    let stats = engine.index_stats();

    println!("Index Statistics");
    println!("{}", "=".repeat(40));
    println!("  Index file:          {}", engine.index_path().display());
    println!("  Chunks:              {}", stats.num_elements);
    println!("  Dimensions:          {}", stats.num_dimensions);
    println!("  Capacity:            {}", stats.max_elements);
    println!("  Utilization:         {:.1}%", stats.utilization_percent);
    println!();

    let sessions = engine.index().session_counts();
    println!("By Session:");
    if sessions.is_empty() {
        println!("  (none)");
    }
    for (session, count) in &sessions {
        println!("  {:<24} {}", session, count);
    }

    Ok(())
}
