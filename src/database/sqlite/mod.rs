use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::queries::{DocumentQueries, KnowledgeBaseQueries};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub use models::{
    BotType, Document, KnowledgeBase, KnowledgeBaseStatus, NewDocument, collection_name_for,
};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("metadata.db");

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(&db_path).await
    }

    // Knowledge base operations
    pub async fn create_knowledge_base(
        &self,
        bot_id: i64,
        bot_type: BotType,
    ) -> Result<KnowledgeBase> {
        KnowledgeBaseQueries::create(&self.pool, bot_id, bot_type).await
    }

    pub async fn get_knowledge_base(&self, bot_id: i64) -> Result<Option<KnowledgeBase>> {
        KnowledgeBaseQueries::get(&self.pool, bot_id).await
    }

    pub async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        KnowledgeBaseQueries::list_all(&self.pool).await
    }

    pub async fn get_knowledge_bases_by_status(
        &self,
        status: KnowledgeBaseStatus,
    ) -> Result<Vec<KnowledgeBase>> {
        KnowledgeBaseQueries::list_by_status(&self.pool, status).await
    }

    pub async fn begin_processing(&self, bot_id: i64) -> Result<bool> {
        KnowledgeBaseQueries::begin_processing(&self.pool, bot_id).await
    }

    pub async fn mark_ready(&self, bot_id: i64, document_id: i64, chunk_count: i64) -> Result<()> {
        KnowledgeBaseQueries::mark_ready(&self.pool, bot_id, document_id, chunk_count).await
    }

    pub async fn mark_failed(&self, bot_id: i64, message: &str) -> Result<()> {
        KnowledgeBaseQueries::mark_failed(&self.pool, bot_id, message).await
    }

    pub async fn fail_if_processing(&self, bot_id: i64, message: &str) -> Result<bool> {
        KnowledgeBaseQueries::fail_if_processing(&self.pool, bot_id, message).await
    }

    pub async fn heartbeat(&self, bot_id: i64) -> Result<()> {
        KnowledgeBaseQueries::heartbeat(&self.pool, bot_id).await
    }

    pub async fn reset_knowledge_base(&self, bot_id: i64) -> Result<()> {
        KnowledgeBaseQueries::reset(&self.pool, bot_id).await
    }

    // Document operations
    pub async fn insert_document(&self, document: NewDocument) -> Result<Document> {
        DocumentQueries::create(&self.pool, document).await
    }

    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    pub async fn list_documents(&self, bot_id: i64) -> Result<Vec<Document>> {
        DocumentQueries::list_for_bot(&self.pool, bot_id).await
    }

    pub async fn set_document_page_count(&self, id: i64, page_count: i64) -> Result<()> {
        DocumentQueries::set_page_count(&self.pool, id, page_count).await
    }

    pub async fn delete_document(&self, id: i64) -> Result<bool> {
        DocumentQueries::delete(&self.pool, id).await
    }
}
