use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A chunk with its embedding, as stored in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable id, `{collection}:g{generation}:{chunk_index}`
    pub id: String,
    pub document_id: i64,
    pub chunk_index: u32,
    /// Page the chunk body came from
    pub page_number: u32,
    /// Leading characters of `text` repeated from the previous chunk
    pub overlap_len: u32,
    pub text: String,
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    #[inline]
    pub fn stable_id(collection: &str, generation: i64, chunk_index: u32) -> String {
        format!("{}:g{}:{}", collection, generation, chunk_index)
    }
}

/// A query hit with its cosine similarity (higher is better)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: ChunkRecord,
    pub score: f32,
}

/// Namespaced nearest-neighbour storage for chunk embeddings
///
/// Every failure is reported as [`crate::KbError::VectorStore`]. Operations on
/// a collection that does not exist behave as if it were empty.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert records, overwriting any with the same id
    async fn upsert(&self, collection: &str, records: Vec<ChunkRecord>) -> Result<()>;

    /// Up to `k` records nearest to `vector`, best first
    async fn query(&self, collection: &str, vector: &[f32], k: usize)
    -> Result<Vec<ScoredRecord>>;

    /// Swap the whole contents of a collection
    ///
    /// Concurrent queries observe either the old or the new contents, never
    /// a mix. On error, or when the future is dropped before completing, the
    /// old contents stay in place.
    async fn replace_collection(&self, collection: &str, records: Vec<ChunkRecord>) -> Result<()>;

    async fn delete_collection(&self, collection: &str) -> Result<()>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// The first `limit` records in chunk order
    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<ChunkRecord>>;
}

/// Cosine similarity, 0.0 for zero-length or mismatched vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
