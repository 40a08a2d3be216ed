use super::*;

fn record(collection: &str, generation: i64, chunk_index: u32, vector: Vec<f32>) -> ChunkRecord {
    ChunkRecord {
        id: ChunkRecord::stable_id(collection, generation, chunk_index),
        document_id: generation,
        chunk_index,
        page_number: 1,
        overlap_len: 0,
        text: format!("generation {} chunk {}", generation, chunk_index),
        vector,
    }
}

#[tokio::test]
async fn query_ranks_by_cosine_similarity() {
    let index = MemoryVectorIndex::new();
    index
        .replace_collection(
            "bot_1_kb",
            vec![
                record("bot_1_kb", 1, 0, vec![1.0, 0.0, 0.0]),
                record("bot_1_kb", 1, 1, vec![0.0, 1.0, 0.0]),
                record("bot_1_kb", 1, 2, vec![0.7, 0.7, 0.0]),
            ],
        )
        .await
        .expect("should replace");

    let hits = index
        .query("bot_1_kb", &[1.0, 0.1, 0.0], 2)
        .await
        .expect("should query");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.chunk_index, 0);
    assert_eq!(hits[1].record.chunk_index, 2);
    assert!(hits[0].score > hits[1].score);
    assert!(hits[0].score <= 1.0);
}

#[tokio::test]
async fn missing_collection_is_empty() {
    let index = MemoryVectorIndex::new();

    assert!(index.query("nope", &[1.0], 4).await.expect("query").is_empty());
    assert_eq!(index.count("nope").await.expect("count"), 0);
    assert!(index.list("nope", 3).await.expect("list").is_empty());
}

#[tokio::test]
async fn upsert_overwrites_by_id() {
    let index = MemoryVectorIndex::new();
    index
        .upsert("c", vec![record("c", 1, 0, vec![1.0, 0.0])])
        .await
        .expect("should upsert");

    let mut replacement = record("c", 1, 0, vec![0.0, 1.0]);
    replacement.text = "rewritten".to_string();
    index
        .upsert("c", vec![replacement, record("c", 1, 1, vec![1.0, 1.0])])
        .await
        .expect("should upsert");

    assert_eq!(index.count("c").await.expect("count"), 2);
    let listed = index.list("c", 10).await.expect("list");
    assert_eq!(listed[0].text, "rewritten");
}

#[tokio::test]
async fn replace_swaps_whole_collection() {
    let index = MemoryVectorIndex::new();
    index
        .replace_collection(
            "c",
            (0..5).map(|i| record("c", 1, i, vec![1.0, 0.0])).collect(),
        )
        .await
        .expect("should replace");
    index
        .replace_collection("c", vec![record("c", 2, 0, vec![0.0, 1.0])])
        .await
        .expect("should replace");

    let listed = index.list("c", 10).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "c:g2:0");
}

#[tokio::test]
async fn collections_are_isolated() {
    let index = MemoryVectorIndex::new();
    index
        .replace_collection("bot_1_kb", vec![record("bot_1_kb", 1, 0, vec![1.0])])
        .await
        .expect("should replace");
    index
        .replace_collection("bot_2_kb", vec![record("bot_2_kb", 1, 0, vec![1.0])])
        .await
        .expect("should replace");

    index
        .delete_collection("bot_1_kb")
        .await
        .expect("should delete");

    assert_eq!(index.count("bot_1_kb").await.expect("count"), 0);
    assert_eq!(index.count("bot_2_kb").await.expect("count"), 1);
}

#[tokio::test]
async fn list_is_in_chunk_order() {
    let index = MemoryVectorIndex::new();
    index
        .upsert(
            "c",
            vec![
                record("c", 1, 3, vec![1.0]),
                record("c", 1, 0, vec![1.0]),
                record("c", 1, 1, vec![1.0]),
            ],
        )
        .await
        .expect("should upsert");

    let listed = index.list("c", 2).await.expect("list");
    assert_eq!(
        listed.iter().map(|r| r.chunk_index).collect::<Vec<_>>(),
        vec![0, 1]
    );
}

#[tokio::test]
async fn unavailable_store_fails_every_operation() {
    let index = MemoryVectorIndex::new();
    index.set_unavailable(true);

    assert!(matches!(
        index.query("c", &[1.0], 1).await,
        Err(KbError::VectorStore(_))
    ));
    assert!(matches!(
        index.replace_collection("c", vec![]).await,
        Err(KbError::VectorStore(_))
    ));

    index.set_unavailable(false);
    assert!(index.count("c").await.is_ok());
}

#[test]
fn cosine_similarity_edge_cases() {
    assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
}
