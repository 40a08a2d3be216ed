use super::*;
use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> =
        ["knowledge_bases", "documents"].into_iter().collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_reopen_keeps_state() -> Result<()> {
    let temp_dir = TempDir::new()?;
    {
        let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
        database
            .create_knowledge_base(5, BotType::QaKnowledgeBase)
            .await?;
        database.begin_processing(5).await?;
    }

    let reopened = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let kb = reopened
        .get_knowledge_base(5)
        .await?
        .expect("knowledge base should survive reopen");
    assert_eq!(kb.status, KnowledgeBaseStatus::Processing);

    Ok(())
}

#[tokio::test]
async fn integration_documents_cascade_with_knowledge_base() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database
        .create_knowledge_base(1, BotType::QaFeedback)
        .await?;
    database
        .insert_document(NewDocument {
            bot_id: 1,
            file_name: "manual.pdf".to_string(),
            storage_path: "/tmp/manual.pdf".to_string(),
            byte_size: 10,
        })
        .await?;

    sqlx::query("DELETE FROM knowledge_bases WHERE bot_id = ?")
        .bind(1_i64)
        .execute(database.pool())
        .await?;

    assert!(database.list_documents(1).await?.is_empty());

    Ok(())
}
