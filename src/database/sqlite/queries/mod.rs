#[cfg(test)]
mod tests;

use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};

const KNOWLEDGE_BASE_COLUMNS: &str = r#"
    bot_id,
    bot_type,
    status,
    collection_name,
    error_message,
    active_document_id,
    generation,
    chunk_count,
    created_date,
    updated_at
"#;

const DOCUMENT_COLUMNS: &str =
    "id, bot_id, file_name, storage_path, byte_size, page_count, uploaded_date";

pub struct KnowledgeBaseQueries;

impl KnowledgeBaseQueries {
    /// Create the knowledge base row for a bot, keeping an existing one
    #[inline]
    pub async fn create(
        pool: &SqlitePool,
        bot_id: i64,
        bot_type: BotType,
    ) -> Result<KnowledgeBase> {
        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO knowledge_bases
                (bot_id, bot_type, status, collection_name, created_date, updated_at)
            VALUES (?, ?, 'empty', ?, ?, ?)
            "#,
        )
        .bind(bot_id)
        .bind(bot_type)
        .bind(collection_name_for(bot_id))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create knowledge base")?
        .rows_affected();

        if inserted == 0 {
            debug!("Knowledge base for bot {} already exists", bot_id);
        }

        Self::get(pool, bot_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created knowledge base"))
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, bot_id: i64) -> Result<Option<KnowledgeBase>> {
        let query = format!(
            "SELECT {} FROM knowledge_bases WHERE bot_id = ?",
            KNOWLEDGE_BASE_COLUMNS
        );
        let result = sqlx::query_as::<_, KnowledgeBase>(&query)
            .bind(bot_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get knowledge base")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<KnowledgeBase>> {
        let query = format!(
            "SELECT {} FROM knowledge_bases ORDER BY bot_id",
            KNOWLEDGE_BASE_COLUMNS
        );
        let result = sqlx::query_as::<_, KnowledgeBase>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list knowledge bases")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_status(
        pool: &SqlitePool,
        status: KnowledgeBaseStatus,
    ) -> Result<Vec<KnowledgeBase>> {
        let query = format!(
            "SELECT {} FROM knowledge_bases WHERE status = ? ORDER BY bot_id",
            KNOWLEDGE_BASE_COLUMNS
        );
        let result = sqlx::query_as::<_, KnowledgeBase>(&query)
            .bind(status)
            .fetch_all(pool)
            .await
            .context("Failed to list knowledge bases by status")?;

        Ok(result)
    }

    /// Move a knowledge base into `processing` unless it already is
    ///
    /// Returns `false` when the row is missing or already processing.
    #[inline]
    pub async fn begin_processing(pool: &SqlitePool, bot_id: i64) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE knowledge_bases
            SET status = 'processing', error_message = NULL, updated_at = ?
            WHERE bot_id = ? AND status != 'processing'
            "#,
        )
        .bind(Utc::now())
        .bind(bot_id)
        .execute(pool)
        .await
        .context("Failed to mark knowledge base as processing")?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Commit a finished ingestion: activate the document and bump the generation
    #[inline]
    pub async fn mark_ready(
        pool: &SqlitePool,
        bot_id: i64,
        document_id: i64,
        chunk_count: i64,
    ) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE knowledge_bases
            SET status = 'ready',
                error_message = NULL,
                active_document_id = ?,
                generation = generation + 1,
                chunk_count = ?,
                updated_at = ?
            WHERE bot_id = ?
            "#,
        )
        .bind(document_id)
        .bind(chunk_count)
        .bind(Utc::now())
        .bind(bot_id)
        .execute(pool)
        .await
        .context("Failed to mark knowledge base as ready")?
        .rows_affected();

        if affected == 0 {
            return Err(anyhow::anyhow!("Knowledge base for bot {} not found", bot_id));
        }
        Ok(())
    }

    #[inline]
    pub async fn mark_failed(pool: &SqlitePool, bot_id: i64, message: &str) -> Result<()> {
        let message = if message.trim().is_empty() {
            warn!("Empty failure message for bot {}, using a generic one", bot_id);
            "Ingestion failed"
        } else {
            message
        };

        sqlx::query(
            r#"
            UPDATE knowledge_bases
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE bot_id = ?
            "#,
        )
        .bind(message)
        .bind(Utc::now())
        .bind(bot_id)
        .execute(pool)
        .await
        .context("Failed to mark knowledge base as failed")?;

        Ok(())
    }

    /// Fail a knowledge base only if it is still processing
    #[inline]
    pub async fn fail_if_processing(
        pool: &SqlitePool,
        bot_id: i64,
        message: &str,
    ) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE knowledge_bases
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE bot_id = ? AND status = 'processing'
            "#,
        )
        .bind(message)
        .bind(Utc::now())
        .bind(bot_id)
        .execute(pool)
        .await
        .context("Failed to fail processing knowledge base")?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Refresh `updated_at` of a processing knowledge base
    #[inline]
    pub async fn heartbeat(pool: &SqlitePool, bot_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE knowledge_bases SET updated_at = ? WHERE bot_id = ? AND status = 'processing'",
        )
        .bind(Utc::now())
        .bind(bot_id)
        .execute(pool)
        .await
        .context("Failed to update knowledge base heartbeat")?;

        Ok(())
    }

    /// Return a knowledge base to `empty`, forgetting its committed generations
    #[inline]
    pub async fn reset(pool: &SqlitePool, bot_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE knowledge_bases
            SET status = 'empty',
                error_message = NULL,
                active_document_id = NULL,
                generation = 0,
                chunk_count = 0,
                updated_at = ?
            WHERE bot_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(bot_id)
        .execute(pool)
        .await
        .context("Failed to reset knowledge base")?;

        Ok(())
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<Document> {
        let id = sqlx::query(
            r#"
            INSERT INTO documents (bot_id, file_name, storage_path, byte_size, uploaded_date)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(new_document.bot_id)
        .bind(&new_document.file_name)
        .bind(&new_document.storage_path)
        .bind(new_document.byte_size)
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
        let query = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let result = sqlx::query_as::<_, Document>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_for_bot(pool: &SqlitePool, bot_id: i64) -> Result<Vec<Document>> {
        let query = format!(
            "SELECT {} FROM documents WHERE bot_id = ? ORDER BY id",
            DOCUMENT_COLUMNS
        );
        let result = sqlx::query_as::<_, Document>(&query)
            .bind(bot_id)
            .fetch_all(pool)
            .await
            .context("Failed to list documents for bot")?;

        Ok(result)
    }

    #[inline]
    pub async fn set_page_count(pool: &SqlitePool, id: i64, page_count: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET page_count = ? WHERE id = ?")
            .bind(page_count)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to set document page count")?;

        Ok(())
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?
            .rows_affected();

        Ok(affected > 0)
    }
}
