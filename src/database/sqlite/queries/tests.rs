use super::*;
use crate::database::sqlite::Database;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

fn new_document(bot_id: i64, name: &str) -> NewDocument {
    NewDocument {
        bot_id,
        file_name: name.to_string(),
        storage_path: format!("/tmp/{}", name),
        byte_size: 2048,
    }
}

#[tokio::test]
async fn create_is_idempotent() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();

    let first = KnowledgeBaseQueries::create(pool, 1, BotType::QaKnowledgeBase).await?;
    assert_eq!(first.status, KnowledgeBaseStatus::Empty);
    assert_eq!(first.collection_name, "bot_1_kb");
    assert_eq!(first.generation, 0);

    KnowledgeBaseQueries::begin_processing(pool, 1).await?;
    let second = KnowledgeBaseQueries::create(pool, 1, BotType::QaKnowledgeBase).await?;
    assert_eq!(second.status, KnowledgeBaseStatus::Processing);
    assert_eq!(KnowledgeBaseQueries::list_all(pool).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn simple_chat_rows_are_rejected_by_schema() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let result = KnowledgeBaseQueries::create(database.pool(), 3, BotType::SimpleChat).await;
    assert!(result.is_err());

    Ok(())
}

#[tokio::test]
async fn begin_processing_is_exclusive() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();
    KnowledgeBaseQueries::create(pool, 1, BotType::QaFeedback).await?;

    assert!(KnowledgeBaseQueries::begin_processing(pool, 1).await?);
    assert!(!KnowledgeBaseQueries::begin_processing(pool, 1).await?);
    assert!(!KnowledgeBaseQueries::begin_processing(pool, 99).await?);

    Ok(())
}

#[tokio::test]
async fn ready_bumps_generation_and_clears_error() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();
    KnowledgeBaseQueries::create(pool, 1, BotType::QaKnowledgeBase).await?;
    let document = DocumentQueries::create(pool, new_document(1, "faq.pdf")).await?;

    KnowledgeBaseQueries::begin_processing(pool, 1).await?;
    KnowledgeBaseQueries::mark_failed(pool, 1, "first attempt broke").await?;
    KnowledgeBaseQueries::begin_processing(pool, 1).await?;
    KnowledgeBaseQueries::mark_ready(pool, 1, document.id, 12).await?;

    let kb = KnowledgeBaseQueries::get(pool, 1)
        .await?
        .expect("knowledge base should exist");
    assert_eq!(kb.status, KnowledgeBaseStatus::Ready);
    assert_eq!(kb.error_message, None);
    assert_eq!(kb.generation, 1);
    assert_eq!(kb.chunk_count, 12);
    assert_eq!(kb.active_document_id, Some(document.id));

    Ok(())
}

#[tokio::test]
async fn failed_always_has_message() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();
    KnowledgeBaseQueries::create(pool, 1, BotType::QaKnowledgeBase).await?;

    KnowledgeBaseQueries::mark_failed(pool, 1, "   ").await?;

    let kb = KnowledgeBaseQueries::get(pool, 1)
        .await?
        .expect("knowledge base should exist");
    assert_eq!(kb.status, KnowledgeBaseStatus::Failed);
    assert_eq!(kb.error_message.as_deref(), Some("Ingestion failed"));

    Ok(())
}

#[tokio::test]
async fn fail_if_processing_ignores_other_states() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();
    KnowledgeBaseQueries::create(pool, 1, BotType::QaKnowledgeBase).await?;
    KnowledgeBaseQueries::create(pool, 2, BotType::QaKnowledgeBase).await?;
    KnowledgeBaseQueries::begin_processing(pool, 2).await?;

    assert!(!KnowledgeBaseQueries::fail_if_processing(pool, 1, "interrupted").await?);
    assert!(KnowledgeBaseQueries::fail_if_processing(pool, 2, "interrupted").await?);

    let processing =
        KnowledgeBaseQueries::list_by_status(pool, KnowledgeBaseStatus::Processing).await?;
    assert!(processing.is_empty());
    let failed = KnowledgeBaseQueries::list_by_status(pool, KnowledgeBaseStatus::Failed).await?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].bot_id, 2);

    Ok(())
}

#[tokio::test]
async fn heartbeat_only_touches_processing_rows() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();
    let created = KnowledgeBaseQueries::create(pool, 1, BotType::QaKnowledgeBase).await?;

    KnowledgeBaseQueries::heartbeat(pool, 1).await?;
    let untouched = KnowledgeBaseQueries::get(pool, 1)
        .await?
        .expect("knowledge base should exist");
    assert_eq!(untouched.updated_at, created.updated_at);

    KnowledgeBaseQueries::begin_processing(pool, 1).await?;
    let started = KnowledgeBaseQueries::get(pool, 1)
        .await?
        .expect("knowledge base should exist");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    KnowledgeBaseQueries::heartbeat(pool, 1).await?;
    let touched = KnowledgeBaseQueries::get(pool, 1)
        .await?
        .expect("knowledge base should exist");
    assert!(touched.updated_at > started.updated_at);

    Ok(())
}

#[tokio::test]
async fn reset_returns_to_empty() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();
    KnowledgeBaseQueries::create(pool, 1, BotType::QaKnowledgeBase).await?;
    let document = DocumentQueries::create(pool, new_document(1, "faq.pdf")).await?;
    KnowledgeBaseQueries::mark_ready(pool, 1, document.id, 4).await?;

    KnowledgeBaseQueries::reset(pool, 1).await?;

    let kb = KnowledgeBaseQueries::get(pool, 1)
        .await?
        .expect("knowledge base should exist");
    assert_eq!(kb.status, KnowledgeBaseStatus::Empty);
    assert_eq!(kb.generation, 0);
    assert_eq!(kb.chunk_count, 0);
    assert_eq!(kb.active_document_id, None);

    Ok(())
}

#[tokio::test]
async fn document_lifecycle() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();
    KnowledgeBaseQueries::create(pool, 1, BotType::QaKnowledgeBase).await?;

    let first = DocumentQueries::create(pool, new_document(1, "v1.pdf")).await?;
    let second = DocumentQueries::create(pool, new_document(1, "v2.pdf")).await?;
    assert_eq!(first.page_count, None);

    DocumentQueries::set_page_count(pool, second.id, 9).await?;
    let updated = DocumentQueries::get_by_id(pool, second.id)
        .await?
        .expect("document should exist");
    assert_eq!(updated.page_count, Some(9));

    let documents = DocumentQueries::list_for_bot(pool, 1).await?;
    assert_eq!(
        documents.iter().map(|d| d.file_name.as_str()).collect::<Vec<_>>(),
        vec!["v1.pdf", "v2.pdf"]
    );

    assert!(DocumentQueries::delete(pool, first.id).await?);
    assert!(!DocumentQueries::delete(pool, first.id).await?);
    assert_eq!(DocumentQueries::list_for_bot(pool, 1).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn documents_require_knowledge_base() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let result = DocumentQueries::create(database.pool(), new_document(404, "orphan.pdf")).await;
    assert!(result.is_err());

    Ok(())
}
