
use super::{
    batch_to_records, batch_to_scored, generation_table_name, parse_generation_table,
    records_to_batch,
};
use crate::database::vector_index::{ChunkRecord, ScoredRecord, VectorIndex};
use crate::{KbError, Result, config::Config};
use arrow::record_batch::RecordBatchIterator;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Vector index backed by LanceDB
///
/// Each committed generation of a collection lives in its own table. The
/// active generation per collection is tracked in memory; queries hold the
/// read side of that map for their whole duration, and a replacement flips
/// the entry under the write side before dropping the superseded table.
pub struct LanceVectorIndex {
    connection: Connection,
    active: RwLock<HashMap<String, u64>>,
}

impl LanceVectorIndex {
    /// Open (or create) the vector database under the configured base directory
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        let db_path = config
            .vector_database_path()
            .map_err(|e| KbError::Config(format!("Failed to get vector database path: {}", e)))?;
        Self::open(&db_path).await
    }

    /// Open (or create) a vector database at `db_path`
    #[inline]
    pub async fn open(db_path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            KbError::VectorStore(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to connect to LanceDB: {}", e)))?;

        let store = Self {
            connection,
            active: RwLock::new(HashMap::new()),
        };
        store.restore_active_generations().await?;

        info!("Vector store initialized successfully");
        Ok(store)
    }

    /// Active generation of a collection, if it has one
    #[inline]
    pub async fn active_generation(&self, collection: &str) -> Option<u64> {
        self.active.read().await.get(collection).copied()
    }

    /// Pick the newest readable table of every collection and drop the rest
    async fn restore_active_generations(&self) -> Result<()> {
        let mut by_collection: HashMap<String, Vec<u64>> = HashMap::new();
        for name in self.table_names().await? {
            if let Some((collection, generation)) = parse_generation_table(&name) {
                by_collection
                    .entry(collection.to_string())
                    .or_default()
                    .push(generation);
            }
        }

        let mut active = self.active.write().await;
        for (collection, mut generations) in by_collection {
            generations.sort_unstable_by(|a, b| b.cmp(a));

            let mut chosen = None;
            for generation in &generations {
                let name = generation_table_name(&collection, *generation);
                if chosen.is_none() && self.is_readable(&name).await {
                    chosen = Some(*generation);
                } else {
                    drop_table_logged(&self.connection, &name).await;
                }
            }

            if let Some(generation) = chosen {
                debug!(
                    "Restored collection {} at generation {}",
                    collection, generation
                );
                active.insert(collection, generation);
            }
        }

        Ok(())
    }

    async fn is_readable(&self, table_name: &str) -> bool {
        match self.open_table(table_name).await {
            Ok(table) => match table.count_rows(None).await {
                Ok(_) => true,
                Err(e) => {
                    warn!("Table {} is not readable: {}", table_name, e);
                    false
                }
            },
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to list tables: {}", e)))
    }

    /// Generations present on disk for a collection, including stale ones
    async fn stored_generations(&self, collection: &str) -> Result<Vec<u64>> {
        Ok(self
            .table_names()
            .await?
            .iter()
            .filter_map(|name| parse_generation_table(name))
            .filter(|(c, _)| *c == collection)
            .map(|(_, generation)| generation)
            .collect())
    }

    async fn open_table(&self, table_name: &str) -> Result<Table> {
        self.connection
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to open table {}: {}", table_name, e)))
    }

    /// Write all records as a new table in one commit
    async fn create_table_with(&self, table_name: &str, records: &[ChunkRecord]) -> Result<()> {
        let batch = records_to_batch(records)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        self.connection
            .create_table(table_name, Box::new(reader))
            .execute()
            .await
            .map_err(|e| {
                KbError::VectorStore(format!("Failed to create table {}: {}", table_name, e))
            })?;

        Ok(())
    }
}

async fn drop_table_logged(connection: &Connection, table_name: &str) {
    match connection.drop_table(table_name).await {
        Ok(()) => debug!("Dropped table {}", table_name),
        Err(e) => warn!("Failed to drop table {}: {}", table_name, e),
    }
}

/// A generation table that is dropped unless it becomes active
///
/// Covers both failed writes and callers that give up on a replacement
/// midway, so restarts never pick up a table that was never committed.
struct StagedTable {
    connection: Connection,
    name: Option<String>,
}

impl StagedTable {
    fn new(connection: Connection, name: String) -> Self {
        Self {
            connection,
            name: Some(name),
        }
    }

    fn activate(mut self) {
        self.name = None;
    }
}

impl Drop for StagedTable {
    fn drop(&mut self) {
        let Some(name) = self.name.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to drop uncommitted table {}", name);
            return;
        };

        let connection = self.connection.clone();
        runtime.spawn(async move {
            drop_table_logged(&connection, &name).await;
        });
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    #[inline]
    async fn upsert(&self, collection: &str, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            debug!("No records to upsert");
            return Ok(());
        }

        // The read guard keeps a concurrent replacement from dropping the table under us
        let active = self.active.read().await;
        let Some(generation) = active.get(collection).copied() else {
            drop(active);
            return self.replace_collection(collection, records).await;
        };

        let table = self
            .open_table(&generation_table_name(collection, generation))
            .await?;

        let ids = records
            .iter()
            .map(|r| format!("'{}'", r.id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        table
            .delete(&format!("id IN ({})", ids))
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to delete old records: {}", e)))?;

        let batch = records_to_batch(&records)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to insert records: {}", e)))?;

        debug!("Upserted {} records into {}", records.len(), collection);
        Ok(())
    }

    #[inline]
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let active = self.active.read().await;
        let Some(generation) = active.get(collection).copied() else {
            debug!("Collection {} has no active generation", collection);
            return Ok(Vec::new());
        };

        let table = self
            .open_table(&generation_table_name(collection, generation))
            .await?;

        let mut results = table
            .vector_search(vector)
            .map_err(|e| KbError::VectorStore(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to execute search: {}", e)))?;

        let mut scored = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to read result stream: {}", e)))?
        {
            scored.extend(batch_to_scored(&batch)?);
        }
        drop(active);

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(
            "Query on {} (generation {}) returned {} results",
            collection,
            generation,
            scored.len()
        );
        Ok(scored)
    }

    #[inline]
    async fn replace_collection(&self, collection: &str, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            return self.delete_collection(collection).await;
        }

        let stored = self.stored_generations(collection).await?;
        let next = stored.iter().copied().max().unwrap_or(0) + 1;
        let table_name = generation_table_name(collection, next);

        info!(
            "Writing {} records to {} as generation {}",
            records.len(),
            collection,
            next
        );

        let staged = StagedTable::new(self.connection.clone(), table_name.clone());
        self.create_table_with(&table_name, &records).await?;

        // Nothing is awaited after the flip, so a cancelled call never
        // leaves the new generation active without returning Ok
        let previous = {
            let mut active = self.active.write().await;
            staged.activate();
            active.insert(collection.to_string(), next)
        };
        debug!(
            "Collection {} switched from generation {:?} to {}",
            collection, previous, next
        );

        let connection = self.connection.clone();
        let superseded: Vec<String> = stored
            .into_iter()
            .map(|generation| generation_table_name(collection, generation))
            .collect();
        tokio::spawn(async move {
            for name in superseded {
                drop_table_logged(&connection, &name).await;
            }
        });

        Ok(())
    }

    #[inline]
    async fn delete_collection(&self, collection: &str) -> Result<()> {
        let mut active = self.active.write().await;
        active.remove(collection);

        for generation in self.stored_generations(collection).await? {
            drop_table_logged(&self.connection, &generation_table_name(collection, generation))
                .await;
        }

        // Superseded tables may be dropped concurrently, so check what is left
        let remaining = self.stored_generations(collection).await?;
        if !remaining.is_empty() {
            return Err(KbError::VectorStore(format!(
                "Failed to drop generations {:?} of {}",
                remaining, collection
            )));
        }

        info!("Deleted collection {}", collection);
        Ok(())
    }

    #[inline]
    async fn count(&self, collection: &str) -> Result<usize> {
        let active = self.active.read().await;
        let Some(generation) = active.get(collection).copied() else {
            return Ok(0);
        };

        let table = self
            .open_table(&generation_table_name(collection, generation))
            .await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to count rows: {}", e)))
    }

    #[inline]
    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<ChunkRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let active = self.active.read().await;
        let Some(generation) = active.get(collection).copied() else {
            return Ok(Vec::new());
        };

        let table = self
            .open_table(&generation_table_name(collection, generation))
            .await?;

        let mut results = table
            .query()
            .only_if(format!("chunk_index < {}", limit))
            .limit(limit)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to list records: {}", e)))?;

        let mut records = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to read result stream: {}", e)))?
        {
            records.extend(batch_to_records(&batch)?);
        }
        drop(active);

        records.sort_by_key(|r| r.chunk_index);
        records.truncate(limit);
        Ok(records)
    }
}
