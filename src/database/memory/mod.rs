// In-process vector index
// Brute-force cosine search over collections held in memory

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::database::vector_index::{ChunkRecord, ScoredRecord, VectorIndex, cosine_similarity};
use crate::{KbError, Result};

type Collection = Arc<Vec<ChunkRecord>>;

/// Vector index keeping each collection as an immutable snapshot
///
/// Writers build a new snapshot and swap the pointer, so a query always runs
/// against one consistent snapshot.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
    unavailable: AtomicBool,
}

impl MemoryVectorIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if the store were unreachable
    #[inline]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KbError::VectorStore(
                "Vector store is unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn snapshot(&self, collection: &str) -> Result<Option<Collection>> {
        self.check_available()?;
        let collections = self
            .collections
            .read()
            .map_err(|_| KbError::VectorStore("Collection lock poisoned".to_string()))?;
        Ok(collections.get(collection).cloned())
    }

    fn swap(&self, collection: &str, records: Option<Vec<ChunkRecord>>) -> Result<()> {
        self.check_available()?;
        let mut collections = self
            .collections
            .write()
            .map_err(|_| KbError::VectorStore("Collection lock poisoned".to_string()))?;
        match records {
            Some(records) => {
                collections.insert(collection.to_string(), Arc::new(records));
            }
            None => {
                collections.remove(collection);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    #[inline]
    async fn upsert(&self, collection: &str, records: Vec<ChunkRecord>) -> Result<()> {
        let mut merged: Vec<ChunkRecord> = self
            .snapshot(collection)?
            .map(|existing| existing.as_ref().clone())
            .unwrap_or_default();

        for record in records {
            match merged.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record,
                None => merged.push(record),
            }
        }

        self.swap(collection, Some(merged))
    }

    #[inline]
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let Some(snapshot) = self.snapshot(collection)? else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredRecord> = snapshot
            .iter()
            .map(|record| ScoredRecord {
                score: cosine_similarity(vector, &record.vector),
                record: record.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.record.chunk_index.cmp(&b.record.chunk_index))
        });
        scored.truncate(k);

        debug!(
            "Memory query on {} returned {} of {} records",
            collection,
            scored.len(),
            snapshot.len()
        );
        Ok(scored)
    }

    #[inline]
    async fn replace_collection(&self, collection: &str, records: Vec<ChunkRecord>) -> Result<()> {
        debug!(
            "Replacing collection {} with {} records",
            collection,
            records.len()
        );
        self.swap(collection, Some(records))
    }

    #[inline]
    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.swap(collection, None)
    }

    #[inline]
    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.snapshot(collection)?.map_or(0, |records| records.len()))
    }

    #[inline]
    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<ChunkRecord>> {
        let Some(snapshot) = self.snapshot(collection)? else {
            return Ok(Vec::new());
        };

        let mut records = snapshot.as_ref().clone();
        records.sort_by_key(|r| r.chunk_index);
        records.truncate(limit);
        Ok(records)
    }
}
