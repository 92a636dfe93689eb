use anyhow::Result;

use convo_rag::config::RagConfig;
use convo_rag::retrieval::{ContextFormat, RetrievalOptions};

pub struct AskArgs<'a> {
    pub question: &'a str,
    pub session: Option<&'a str>,
    pub format: Option<ContextFormat>,
    pub max_tokens: Option<usize>,
    pub json: bool,
}

/// Retrieve context for a question and print it.
pub async fn ask(config: RagConfig, args: AskArgs<'_>) -> Result<()> {
    let mut options = RetrievalOptions::from(&config.retrieval);
    if let Some(format) = args.format {
        options.format = format;
    }
    if let Some(max_tokens) = args.max_tokens {
        options.max_tokens = max_tokens;
    }

    let engine = super::open_engine(config).await?;
    let outcome = engine
        .retrieve_context(args.question, args.session, Some(&options))
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome.context {
        Some(ref context) => {
            println!("{context}");
            eprintln!();
            eprintln!(
                "{} chunk(s), {} tokens, avg score {:.2}{}",
                outcome.chunks.as_ref().map_or(0, Vec::len),
                outcome.tokens_used.unwrap_or(0),
                outcome.avg_score.unwrap_or(0.0),
                if outcome.low_confidence == Some(true) { " (low confidence)" } else { "" }
            );
        }
        None => {
            let reason = outcome.reason.as_deref().unwrap_or("unknown");
            if outcome.skipped == Some(true) {
                println!("Retrieval skipped ({reason}): answer directly.");
            } else {
                println!("No context ({reason}).");
                if let Some(ref error) = outcome.error {
                    println!("  {error}");
                }
            }
        }
    }
    Ok(())
}
