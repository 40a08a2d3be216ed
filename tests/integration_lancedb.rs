#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

/// Integration tests for ingestion and retrieval over the LanceDB vector store
use async_trait::async_trait;
use kb_pipeline::config::Config;
use kb_pipeline::database::lancedb::LanceVectorIndex;
use kb_pipeline::database::{
    BotType, ChunkRecord, Database, KnowledgeBaseStatus, VectorIndex, collection_name_for,
};
use kb_pipeline::embeddings::{Embedder, EmbeddingError, EmbeddingService, RetryPolicy};
use kb_pipeline::extraction::{ExtractedDocument, PageText, TextExtractor, normalize_text};
use kb_pipeline::ingestion::{DocumentUpload, IngestionOrchestrator, JobOutcome};
use kb_pipeline::retrieval::{RetrievalOptions, Retriever};
use kb_pipeline::{KbError, Result};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const DIMENSION: usize = 768;
const TOPICS: [&str; 6] = [
    "installation",
    "configuration",
    "refund",
    "shipping",
    "warranty",
    "troubleshooting",
];

/// 768-dimensional vectors (nomic-embed-text sized) with one axis per topic
struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut vector = vec![0.0_f32; DIMENSION];
                for (i, topic) in TOPICS.iter().enumerate() {
                    vector[i] = lower.matches(topic).count() as f32;
                }
                // Shared low-weight background so no vector is all zeros
                for (i, value) in vector.iter_mut().enumerate().skip(TOPICS.len()) {
                    *value = ((i as f32) * 0.01).sin().abs() * 0.001;
                }
                vector
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "topic"
    }
}

/// Reads uploads as plain text with form feeds between pages
struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| KbError::Extraction(e.to_string()))?;
        let pages: Vec<PageText> = raw
            .split('\x0c')
            .enumerate()
            .map(|(i, text)| PageText {
                page_number: i as u32 + 1,
                text: normalize_text(text),
            })
            .filter(|page| !page.text.is_empty())
            .collect();

        Ok(ExtractedDocument {
            page_count: pages.len() as u32,
            pages,
        })
    }
}

struct Stack {
    orchestrator: IngestionOrchestrator,
    retriever: Retriever,
    index: Arc<LanceVectorIndex>,
    config: Config,
}

fn create_test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.chunking.max_chunk_chars = 400;
    config.chunking.overlap_chars = 40;
    config
}

async fn open_stack(config: Config) -> Stack {
    let database = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .expect("should initialize database");
    let index = Arc::new(
        LanceVectorIndex::new(&config)
            .await
            .expect("should open vector store"),
    );
    let embeddings = Arc::new(
        EmbeddingService::new(Arc::new(TopicEmbedder), 8, RetryPolicy::default())
            .with_expected_dimension(DIMENSION),
    );

    let orchestrator = IngestionOrchestrator::new(
        &config,
        database.clone(),
        Arc::clone(&index) as Arc<dyn VectorIndex>,
        Arc::clone(&embeddings),
        Arc::new(PlainTextExtractor),
    )
    .await
    .expect("should build orchestrator");
    let retriever = Retriever::new(
        database,
        Arc::clone(&index) as Arc<dyn VectorIndex>,
        embeddings,
    );

    Stack {
        orchestrator,
        retriever,
        index,
        config,
    }
}

async fn ingest(stack: &Stack, bot_id: i64, name: &str, content: &str) -> JobOutcome {
    let path = stack.config.get_base_dir().join(name);
    tokio::fs::write(&path, content)
        .await
        .expect("should write upload");
    let upload = DocumentUpload::from_path(&path)
        .await
        .expect("should describe upload");
    stack
        .orchestrator
        .submit(bot_id, upload)
        .await
        .expect("upload should be accepted")
        .wait()
        .await
        .expect("job should finish")
}

fn product_manual() -> String {
    [
        "Installation\n\nRun the installation script from the root of the archive. \
         The installation takes about five minutes and needs network access.",
        "Configuration\n\nThe configuration file lives next to the binary. \
         Every configuration key has a documented default.",
        "\x0cRefund policy\n\nA refund is issued within fourteen days of purchase. \
         Each refund request needs the original receipt.",
        "Shipping\n\nShipping takes three to five business days. \
         Express shipping is available at checkout.",
        "\x0cWarranty\n\nThe warranty covers manufacturing defects for two years. \
         The warranty excludes water damage.",
    ]
    .join("\n\n")
}

#[tokio::test]
async fn ingest_and_query_realistic_document() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let stack = open_stack(create_test_config(&temp_dir)).await;
    stack
        .orchestrator
        .create_knowledge_base(1, BotType::QaKnowledgeBase)
        .await
        .expect("should create");

    let outcome = ingest(&stack, 1, "manual.pdf", &product_manual()).await;
    let JobOutcome::Ready {
        page_count,
        chunk_count,
        ..
    } = outcome
    else {
        panic!("expected ready outcome, got {:?}", outcome);
    };
    assert_eq!(page_count, 3);
    assert!(chunk_count >= 3);

    let collection = collection_name_for(1);
    assert_eq!(
        stack.index.count(&collection).await.expect("should count"),
        chunk_count
    );
    assert_eq!(stack.index.active_generation(&collection).await, Some(1));

    let result = stack
        .retriever
        .retrieve(1, "How do I get a refund?", &RetrievalOptions::default())
        .await
        .expect("should retrieve");
    assert!(result.grounded);
    assert!(result.context.contains("fourteen days"));
    assert_eq!(result.citations[0].page_number, 2);
    assert!(
        result
            .hits
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score)
    );

    let listed = stack
        .index
        .list(&collection, 2)
        .await
        .expect("should list");
    assert_eq!(
        listed.iter().map(|r| r.chunk_index).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert!(listed.iter().all(|r| r.vector.len() == DIMENSION));
}

#[tokio::test]
async fn committed_generation_survives_restart() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(&temp_dir);
    let collection = collection_name_for(4);

    let document_id = {
        let stack = open_stack(config.clone()).await;
        stack
            .orchestrator
            .create_knowledge_base(4, BotType::QaFeedback)
            .await
            .expect("should create");
        let JobOutcome::Ready { document_id, .. } =
            ingest(&stack, 4, "manual.pdf", &product_manual()).await
        else {
            panic!("ingestion should succeed");
        };
        document_id
    };

    let reopened = open_stack(config).await;
    assert_eq!(reopened.index.active_generation(&collection).await, Some(1));
    assert_eq!(
        reopened.orchestrator.status(4).await.expect("should exist").status,
        KnowledgeBaseStatus::Ready
    );

    let result = reopened
        .retriever
        .retrieve(4, "shipping times", &RetrievalOptions::default())
        .await
        .expect("should retrieve after restart");
    assert!(result.grounded);
    assert!(result.citations.iter().all(|c| c.document_id == document_id));
    assert!(result.context.contains("three to five business days"));
}

#[tokio::test]
async fn reingestion_replaces_generation_table() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let stack = open_stack(create_test_config(&temp_dir)).await;
    stack
        .orchestrator
        .create_knowledge_base(2, BotType::QaKnowledgeBase)
        .await
        .expect("should create");
    let collection = collection_name_for(2);

    ingest(&stack, 2, "v1.pdf", &product_manual()).await;
    let outcome = ingest(
        &stack,
        2,
        "v2.pdf",
        "Troubleshooting\n\nRestart the service before opening a troubleshooting ticket.",
    )
    .await;
    let JobOutcome::Ready {
        document_id,
        chunk_count,
        ..
    } = outcome
    else {
        panic!("expected ready outcome, got {:?}", outcome);
    };
    assert_eq!(chunk_count, 1);
    assert_eq!(stack.index.active_generation(&collection).await, Some(2));
    assert_eq!(stack.index.count(&collection).await.expect("should count"), 1);

    let records: Vec<ChunkRecord> = stack
        .index
        .list(&collection, 10)
        .await
        .expect("should list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].document_id, document_id);
    assert_eq!(records[0].id, ChunkRecord::stable_id(&collection, 2, 0));

    // Nothing from the first document is left to match
    let result = stack
        .retriever
        .retrieve(2, "refund", &RetrievalOptions::default())
        .await
        .expect("should retrieve");
    assert!(!result.grounded);
}

#[tokio::test]
async fn delete_leaves_other_bots_untouched() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let stack = open_stack(create_test_config(&temp_dir)).await;
    for bot_id in [1, 2] {
        stack
            .orchestrator
            .create_knowledge_base(bot_id, BotType::QaKnowledgeBase)
            .await
            .expect("should create");
        let outcome = ingest(&stack, bot_id, "manual.pdf", &product_manual()).await;
        assert!(matches!(outcome, JobOutcome::Ready { .. }));
    }

    stack
        .orchestrator
        .delete_knowledge_base(1)
        .await
        .expect("should delete");

    assert_eq!(
        stack
            .index
            .count(&collection_name_for(1))
            .await
            .expect("should count"),
        0
    );
    assert_eq!(
        stack.index.active_generation(&collection_name_for(1)).await,
        None
    );
    assert!(matches!(
        stack
            .retriever
            .retrieve(1, "refund", &RetrievalOptions::default())
            .await,
        Err(KbError::NotReady {
            status: KnowledgeBaseStatus::Empty,
            ..
        })
    ));

    let result = stack
        .retriever
        .retrieve(2, "warranty coverage", &RetrievalOptions::default())
        .await
        .expect("should retrieve");
    assert!(result.grounded);
    assert!(result.context.contains("two years"));
}

#[tokio::test]
async fn preview_samples_lancedb_collection() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let stack = open_stack(create_test_config(&temp_dir)).await;
    stack
        .orchestrator
        .create_knowledge_base(3, BotType::QaKnowledgeBase)
        .await
        .expect("should create");
    assert_eq!(
        stack.retriever.preview(3).await.expect("should preview"),
        None
    );

    ingest(&stack, 3, "manual.pdf", &product_manual()).await;

    let preview = stack
        .retriever
        .preview(3)
        .await
        .expect("should preview")
        .expect("should have content");
    assert!(preview.contains("Installation"));
    assert!(preview.chars().count() > 100);
}
