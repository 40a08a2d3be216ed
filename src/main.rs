use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kb_pipeline::commands::{
    Pipeline, configure, create_knowledge_base, delete_knowledge_base, preview, query, reconcile,
    show_status, upload_document,
};
use kb_pipeline::config::{Config, get_config_dir};
use kb_pipeline::database::sqlite::BotType;
use kb_pipeline::retrieval::RetrievalOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kb-pipeline")]
#[command(about = "Knowledge base ingestion and grounded retrieval for document-backed chatbots")]
#[command(version)]
struct Cli {
    /// Base directory for configuration and data (defaults to ~/.kb-pipeline)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file and check the Ollama connection
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Create the empty knowledge base of a bot
    Create {
        bot_id: i64,
        /// Bot type: qa_knowledge_base or qa_feedback
        #[arg(long = "type", default_value = "qa_knowledge_base")]
        bot_type: BotType,
    },
    /// Ingest a PDF into a bot's knowledge base, replacing its previous document
    Upload {
        bot_id: i64,
        /// Path to the PDF file
        file: PathBuf,
    },
    /// Show knowledge base status for one bot, or all of them
    Status { bot_id: Option<i64> },
    /// Retrieve grounded context for a question
    Query {
        bot_id: i64,
        question: String,
        /// Number of nearest chunks to consider
        #[arg(short)]
        k: Option<usize>,
        /// Minimum cosine similarity for a chunk to be used
        #[arg(long)]
        threshold: Option<f32>,
        /// Maximum characters of context to return
        #[arg(long)]
        max_chars: Option<usize>,
    },
    /// Print a sample of a knowledge base's content
    Preview { bot_id: i64 },
    /// Remove a bot's document and chunks, leaving an empty knowledge base
    Delete { bot_id: i64 },
    /// Fail ingestions that were interrupted by a crash or restart
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    let config = Config::load(&base_dir).context("Failed to load configuration")?;

    if let Commands::Config { show } = cli.command {
        return configure(&config, show);
    }

    let pipeline = Pipeline::open(config).await?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Create { bot_id, bot_type } => {
            create_knowledge_base(&pipeline, bot_id, bot_type).await?;
        }
        Commands::Upload { bot_id, file } => {
            upload_document(&pipeline, bot_id, &file).await?;
        }
        Commands::Status { bot_id } => {
            show_status(&pipeline, bot_id).await?;
        }
        Commands::Query {
            bot_id,
            question,
            k,
            threshold,
            max_chars,
        } => {
            let defaults = RetrievalOptions::from(&pipeline.config.retrieval);
            let options = RetrievalOptions {
                k: k.unwrap_or(defaults.k),
                similarity_threshold: threshold.unwrap_or(defaults.similarity_threshold),
                max_context_chars: max_chars.unwrap_or(defaults.max_context_chars),
                ..defaults
            };
            query(&pipeline, bot_id, &question, &options).await?;
        }
        Commands::Preview { bot_id } => {
            preview(&pipeline, bot_id).await?;
        }
        Commands::Delete { bot_id } => {
            delete_knowledge_base(&pipeline, bot_id).await?;
        }
        Commands::Reconcile => {
            reconcile(&pipeline).await?;
        }
    }

    Ok(())
}
