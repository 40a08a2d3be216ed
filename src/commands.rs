use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, show_config};
use crate::database::lancedb::LanceVectorIndex;
use crate::database::sqlite::{BotType, Database, KnowledgeBase, KnowledgeBaseStatus};
use crate::database::vector_index::VectorIndex;
use crate::embeddings::{EmbeddingService, OllamaEmbedder, RetryPolicy};
use crate::extraction::PdfExtractor;
use crate::ingestion::{DocumentUpload, IngestionOrchestrator, JobOutcome};
use crate::retrieval::{RetrievalOptions, Retriever};

/// Services wired together from a configuration directory
#[derive(Debug)]
pub struct Pipeline {
    pub config: Config,
    pub orchestrator: IngestionOrchestrator,
    pub retriever: Retriever,
}

impl Pipeline {
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .context("Failed to initialize SQLite database")?;

        let vector_index: Arc<dyn VectorIndex> = Arc::new(
            LanceVectorIndex::new(&config)
                .await
                .context("Failed to initialize LanceDB vector store")?,
        );

        let embedder =
            OllamaEmbedder::new(&config.ollama).context("Failed to initialize Ollama client")?;
        let embeddings = Arc::new(
            EmbeddingService::new(
                Arc::new(embedder),
                config.ollama.batch_size as usize,
                RetryPolicy::from_config(&config.ollama),
            )
            .with_expected_dimension(config.ollama.embedding_dimension as usize),
        );

        let orchestrator = IngestionOrchestrator::new(
            &config,
            database.clone(),
            Arc::clone(&vector_index),
            Arc::clone(&embeddings),
            Arc::new(PdfExtractor),
        )
        .await
        .context("Failed to start ingestion orchestrator")?;

        let retriever = Retriever::new(database, vector_index, embeddings);

        Ok(Self {
            config,
            orchestrator,
            retriever,
        })
    }
}

/// Write the configuration file if needed and check the Ollama connection
#[inline]
pub fn configure(config: &Config, show: bool) -> Result<()> {
    if show {
        return show_config(config);
    }

    let config_path = config.config_file_path()?;
    if config_path.exists() {
        eprintln!(
            "Using existing configuration at {}",
            style(config_path.display()).dim()
        );
    } else {
        config.save()?;
        eprintln!(
            "{} {}",
            style("✓ Wrote default configuration to").green(),
            style(config_path.display()).dim()
        );
    }

    let embedder = OllamaEmbedder::new(&config.ollama)?;
    eprint!("Testing connection to {}... ", embedder.base_url());
    match embedder.health_check() {
        Ok(()) => eprintln!("{}", style("✓ Connected").green()),
        Err(e) => {
            eprintln!("{}", style("✗ Failed").red());
            eprintln!("  {}", style(format!("{:#}", e)).red());
            eprintln!(
                "  Edit {} and make sure Ollama is running.",
                config_path.display()
            );
        }
    }

    Ok(())
}

#[inline]
pub async fn create_knowledge_base(
    pipeline: &Pipeline,
    bot_id: i64,
    bot_type: BotType,
) -> Result<()> {
    let knowledge_base = pipeline
        .orchestrator
        .create_knowledge_base(bot_id, bot_type)
        .await?;

    println!(
        "Knowledge base {} for bot {} is {}",
        knowledge_base.collection_name,
        bot_id,
        styled_status(knowledge_base.status)
    );
    Ok(())
}

/// Ingest a PDF and wait for the job to finish
#[inline]
pub async fn upload_document(pipeline: &Pipeline, bot_id: i64, path: &Path) -> Result<()> {
    let upload = DocumentUpload::from_path(path).await?;
    info!("Uploading {} for bot {}", path.display(), bot_id);

    let job = pipeline.orchestrator.submit(bot_id, upload).await?;

    let bar = if console::user_attended_stderr() {
        let bar = ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .context("Invalid progress template")?,
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(format!("Ingesting {}", path.display()));

    let outcome = job.wait().await;
    bar.finish_and_clear();

    match outcome? {
        JobOutcome::Ready {
            document_id,
            page_count,
            chunk_count,
        } => {
            println!(
                "{} document {} ({} pages, {} chunks)",
                style("✓ Ready:").green().bold(),
                document_id,
                page_count,
                chunk_count
            );
        }
        JobOutcome::Failed { message } => {
            println!("{} {}", style("✗ Failed:").red().bold(), message);
        }
    }

    Ok(())
}

#[inline]
pub async fn show_status(pipeline: &Pipeline, bot_id: Option<i64>) -> Result<()> {
    let knowledge_bases = match bot_id {
        Some(bot_id) => vec![pipeline.orchestrator.status(bot_id).await?],
        None => pipeline.orchestrator.list().await?,
    };

    if knowledge_bases.is_empty() {
        println!("No knowledge bases have been created yet.");
        println!("Use 'kb-pipeline create <bot-id>' to create one.");
        return Ok(());
    }

    for knowledge_base in &knowledge_bases {
        print_knowledge_base(pipeline, knowledge_base);
    }

    if bot_id.is_none() {
        let count = |status: KnowledgeBaseStatus| {
            knowledge_bases
                .iter()
                .filter(|kb| kb.status == status)
                .count()
        };
        println!("Summary:");
        println!("  Total: {}", knowledge_bases.len());
        println!("  Ready: {}", count(KnowledgeBaseStatus::Ready));
        println!("  Processing: {}", count(KnowledgeBaseStatus::Processing));
        println!("  Failed: {}", count(KnowledgeBaseStatus::Failed));
        println!("  Empty: {}", count(KnowledgeBaseStatus::Empty));
    }

    Ok(())
}

fn print_knowledge_base(pipeline: &Pipeline, knowledge_base: &KnowledgeBase) {
    println!(
        "🤖 Bot {} ({})",
        knowledge_base.bot_id, knowledge_base.bot_type
    );
    println!("   Collection: {}", knowledge_base.collection_name);
    println!("   Status: {}", styled_status(knowledge_base.status));
    println!(
        "   Generation: {} ({} chunks)",
        knowledge_base.generation, knowledge_base.chunk_count
    );
    if let Some(document_id) = knowledge_base.active_document_id {
        println!("   Active Document: {}", document_id);
    }
    if let Some(error) = &knowledge_base.error_message {
        println!("   ⚠️  Error: {}", error);
    }
    if knowledge_base.is_processing() {
        let elapsed = chrono::Utc::now()
            .signed_duration_since(knowledge_base.updated_at)
            .num_seconds();
        let owner = if pipeline.orchestrator.is_job_active(knowledge_base.bot_id) {
            "this process"
        } else {
            "another process"
        };
        println!("   Job: running in {} (heartbeat {}s ago)", owner, elapsed);
    }
    println!(
        "   Updated: {}",
        knowledge_base.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!();
}

#[inline]
pub async fn query(
    pipeline: &Pipeline,
    bot_id: i64,
    question: &str,
    options: &RetrievalOptions,
) -> Result<()> {
    let result = pipeline
        .retriever
        .retrieve(bot_id, question, options)
        .await?;

    if !result.grounded {
        println!(
            "{}",
            style("No relevant content found in the knowledge base.").yellow()
        );
        return Ok(());
    }

    println!("{}", result.context);
    println!();
    println!("{}", style("Sources:").bold());
    for citation in &result.citations {
        println!(
            "  document {} chunk {} (page {}) score {:.3}",
            citation.document_id, citation.chunk_index, citation.page_number, citation.score
        );
    }

    Ok(())
}

#[inline]
pub async fn preview(pipeline: &Pipeline, bot_id: i64) -> Result<()> {
    match pipeline.retriever.preview(bot_id).await? {
        Some(preview) => println!("{}", preview),
        None => println!(
            "{}",
            style("No knowledge base content available for analysis").yellow()
        ),
    }
    Ok(())
}

#[inline]
pub async fn delete_knowledge_base(pipeline: &Pipeline, bot_id: i64) -> Result<()> {
    pipeline.orchestrator.delete_knowledge_base(bot_id).await?;
    println!("Knowledge base for bot {} was emptied", bot_id);
    Ok(())
}

#[inline]
pub async fn reconcile(pipeline: &Pipeline) -> Result<()> {
    let mut recovered = pipeline.orchestrator.recovered_on_startup().to_vec();
    recovered.extend(pipeline.orchestrator.reconcile().await?);

    if recovered.is_empty() {
        println!("No interrupted ingestions found.");
    } else {
        warn!("Failed {} interrupted ingestion(s)", recovered.len());
        for bot_id in recovered {
            println!(
                "Bot {}: {}",
                bot_id,
                styled_status(KnowledgeBaseStatus::Failed)
            );
        }
    }

    Ok(())
}

fn styled_status(status: KnowledgeBaseStatus) -> console::StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        KnowledgeBaseStatus::Ready => text.green(),
        KnowledgeBaseStatus::Processing => text.cyan(),
        KnowledgeBaseStatus::Failed => text.red(),
        KnowledgeBaseStatus::Empty => text.dim(),
    }
}
