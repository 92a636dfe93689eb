mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use convo_rag::config::RagConfig;
use convo_rag::retrieval::ContextFormat;

#[derive(Parser)]
#[command(name = "convo-rag", version, about = "Local retrieval over past conversations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Chunk, embed and index a JSON transcript
    Ingest {
        /// JSON array of {speaker, message, timestamp?}
        file: PathBuf,
        #[arg(long)]
        session: String,
    },
    /// Retrieve context for a question
    Ask {
        question: String,
        /// Only search this session
        #[arg(long)]
        session: Option<String>,
        /// xml or plain
        #[arg(long)]
        format: Option<ContextFormat>,
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Print the full retrieval outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics
    Stats,
    /// Remove every chunk of a session
    Forget { session: String },
    /// Delete all indexed chunks
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Check model files and the saved index
    Doctor,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.convo-rag/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = RagConfig::load()?;

    // Log to stderr so stdout stays clean for context output.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
        Command::Ingest { file, session } => {
            cli::ingest::ingest(config, &file, &session).await?;
        }
        Command::Ask {
            question,
            session,
            format,
            max_tokens,
            json,
        } => {
            let args = cli::ask::AskArgs {
                question: &question,
                session: session.as_deref(),
                format,
                max_tokens,
                json,
            };
            cli::ask::ask(config, args).await?;
        }
        Command::Stats => {
            cli::stats::stats(config).await?;
        }
        Command::Forget { session } => {
            cli::forget::forget(config, &session).await?;
        }
        Command::Reset { yes } => {
            cli::reset::reset(config, yes).await?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&config).await?;
        }
    }

    Ok(())
}
