use std::time::Duration;

use thiserror::Error;

use crate::database::sqlite::KnowledgeBaseStatus;
use crate::embeddings::EmbeddingError;

pub type Result<T> = std::result::Result<T, KbError>;

#[derive(Error, Debug)]
pub enum KbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding service error: {0}")]
    EmbeddingService(#[from] EmbeddingError),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Knowledge base for bot {bot_id} is not ready (status: {status})")]
    NotReady {
        bot_id: i64,
        status: KnowledgeBaseStatus,
    },

    #[error("Retrieval timed out after {0:?}")]
    RetrievalTimeout(Duration),

    #[error("An ingestion job is already processing for bot {bot_id}")]
    IngestionConflict { bot_id: i64 },

    #[error("No knowledge base exists for bot {0}")]
    BotNotFound(i64),

    #[error("Bot type '{0}' does not support a knowledge base")]
    UnsupportedBotType(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Ingestion exceeded its time budget of {0:?}")]
    JobTimeout(Duration),

    #[error("Ingestion job panicked: {0}")]
    JobPanicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl KbError {
    /// Wraps infrastructure errors coming from the SQLite layer
    #[inline]
    pub fn database(error: &anyhow::Error) -> Self {
        Self::Database(format!("{error:#}"))
    }
}

pub mod chunking;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod extraction;
pub mod ingestion;
pub mod retrieval;
