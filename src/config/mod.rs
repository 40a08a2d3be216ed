pub mod settings;


use anyhow::Result;
use console::style;

pub use settings::{Config, ConfigError, IngestionConfig, OllamaConfig, RetrievalConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Print the effective configuration to stderr
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    eprintln!(
        "  Retries: {} (backoff {}ms to {}ms)",
        style(config.ollama.retry_attempts).cyan(),
        config.ollama.initial_backoff_ms,
        config.ollama.max_backoff_ms
    );
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!(
        "  Max Chunk Size: {}",
        style(config.chunking.max_chunk_chars).cyan()
    );
    eprintln!("  Overlap: {}", style(config.chunking.overlap_chars).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!(
        "  Max Context: {} chars",
        style(config.retrieval.max_context_chars).cyan()
    );
    eprintln!(
        "  Similarity Threshold: {}",
        style(config.retrieval.similarity_threshold).cyan()
    );
    eprintln!(
        "  Timeout: {}s",
        style(config.retrieval.timeout_seconds).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Ingestion:").bold().yellow());
    eprintln!(
        "  Job Timeout: {}s",
        style(config.ingestion.job_timeout_seconds).cyan()
    );
    eprintln!(
        "  Max Document Size: {} bytes",
        style(config.ingestion.max_document_bytes).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path()?.display()).dim()
    );

    Ok(())
}
