// Ingestion orchestration
// Runs the extract, chunk, embed and commit pipeline for one bot at a time

pub mod recovery;
pub mod registry;


use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunking::{ChunkingConfig, chunk_pages};
use crate::config::{Config, IngestionConfig};
use crate::database::sqlite::{
    BotType, Database, Document, KnowledgeBase, NewDocument, collection_name_for,
};
use crate::database::vector_index::{ChunkRecord, VectorIndex};
use crate::embeddings::EmbeddingService;
use crate::extraction::TextExtractor;
use crate::{KbError, Result};

pub use recovery::{INTERRUPTED_MESSAGE, reconcile_interrupted_jobs};
pub use registry::{JobRegistry, JobSlot};

/// A file handed over for ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    pub path: PathBuf,
    /// Size reported by the uploader, checked against the file on disk
    pub declared_size: u64,
    /// Original file name, used for display and the extension check
    pub file_name: String,
}

impl DocumentUpload {
    /// Describe a file on disk, declaring its current size
    #[inline]
    pub async fn from_path(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            KbError::InvalidDocument(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            declared_size: metadata.len(),
            file_name,
        })
    }
}

/// How a finished job left the knowledge base
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Ready {
        document_id: i64,
        page_count: u32,
        chunk_count: usize,
    },
    Failed {
        message: String,
    },
}

/// Handle to an accepted ingestion
///
/// Await it with [`IngestionJob::wait`], or drop it to let the job run detached.
#[derive(Debug)]
pub struct IngestionJob {
    bot_id: i64,
    document_id: i64,
    handle: JoinHandle<JobOutcome>,
}

impl IngestionJob {
    #[inline]
    pub fn bot_id(&self) -> i64 {
        self.bot_id
    }

    #[inline]
    pub fn document_id(&self) -> i64 {
        self.document_id
    }

    #[inline]
    pub async fn wait(self) -> Result<JobOutcome> {
        self.handle
            .await
            .map_err(|e| KbError::JobPanicked(panic_message(e)))
    }
}

/// Chunks of a new generation, embedded and ready to commit
struct PreparedGeneration {
    page_count: u32,
    records: Vec<ChunkRecord>,
}

/// Aborts the heartbeat task when the job that owns it ends
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    #[inline]
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owner of every knowledge base state transition
#[derive(Clone)]
pub struct IngestionOrchestrator {
    database: Database,
    vector_index: Arc<dyn VectorIndex>,
    embeddings: Arc<EmbeddingService>,
    extractor: Arc<dyn TextExtractor>,
    registry: JobRegistry,
    chunking: ChunkingConfig,
    settings: IngestionConfig,
    documents_dir: PathBuf,
    recovered: Vec<i64>,
}

impl std::fmt::Debug for IngestionOrchestrator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionOrchestrator")
            .field("embeddings", &self.embeddings)
            .field("registry", &self.registry)
            .field("chunking", &self.chunking)
            .field("settings", &self.settings)
            .field("documents_dir", &self.documents_dir)
            .finish_non_exhaustive()
    }
}

impl IngestionOrchestrator {
    /// Build the orchestrator and fail any ingestion a previous process left behind
    #[inline]
    pub async fn new(
        config: &Config,
        database: Database,
        vector_index: Arc<dyn VectorIndex>,
        embeddings: Arc<EmbeddingService>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        let documents_dir = config
            .documents_path()
            .map_err(|e| KbError::Config(format!("Failed to get documents path: {}", e)))?;

        let mut orchestrator = Self {
            database,
            vector_index,
            embeddings,
            extractor,
            registry: JobRegistry::new(),
            chunking: config.chunking.clone(),
            settings: config.ingestion.clone(),
            documents_dir,
            recovered: Vec::new(),
        };

        let reconciled = orchestrator.reconcile().await?;
        if !reconciled.is_empty() {
            info!(
                "Recovered {} interrupted ingestion(s): {:?}",
                reconciled.len(),
                reconciled
            );
        }
        orchestrator.recovered = reconciled;

        Ok(orchestrator)
    }

    /// Bots whose interrupted ingestion was failed when this orchestrator started
    #[inline]
    pub fn recovered_on_startup(&self) -> &[i64] {
        &self.recovered
    }

    /// Fail stale `processing` knowledge bases that no local job owns
    #[inline]
    pub async fn reconcile(&self) -> Result<Vec<i64>> {
        reconcile_interrupted_jobs(&self.database, &self.registry, self.settings.stale_after())
            .await
            .map_err(|e| KbError::database(&e))
    }

    /// Create the empty knowledge base of a bot; existing ones are returned as-is
    #[inline]
    pub async fn create_knowledge_base(
        &self,
        bot_id: i64,
        bot_type: BotType,
    ) -> Result<KnowledgeBase> {
        if !bot_type.requires_knowledge_base() {
            return Err(KbError::UnsupportedBotType(bot_type.to_string()));
        }

        let knowledge_base = self
            .database
            .create_knowledge_base(bot_id, bot_type)
            .await
            .map_err(|e| KbError::database(&e))?;

        info!(
            "Knowledge base {} ready for bot {} ({})",
            knowledge_base.collection_name, bot_id, bot_type
        );
        Ok(knowledge_base)
    }

    #[inline]
    pub async fn status(&self, bot_id: i64) -> Result<KnowledgeBase> {
        self.database
            .get_knowledge_base(bot_id)
            .await
            .map_err(|e| KbError::database(&e))?
            .ok_or(KbError::BotNotFound(bot_id))
    }

    #[inline]
    pub async fn list(&self) -> Result<Vec<KnowledgeBase>> {
        self.database
            .list_knowledge_bases()
            .await
            .map_err(|e| KbError::database(&e))
    }

    #[inline]
    pub fn is_job_active(&self, bot_id: i64) -> bool {
        self.registry.is_active(bot_id)
    }

    /// Accept an upload and start ingesting it in the background
    ///
    /// Validation failures and conflicts are returned before anything changes.
    /// Once accepted the knowledge base is `processing` and keeps serving its
    /// previous generation until the job commits.
    #[inline]
    pub async fn submit(&self, bot_id: i64, upload: DocumentUpload) -> Result<IngestionJob> {
        self.status(bot_id).await?;
        validate_upload(&upload, self.settings.max_document_bytes).await?;

        let slot = self
            .registry
            .try_acquire(bot_id)
            .ok_or(KbError::IngestionConflict { bot_id })?;

        // Read again under the slot so the generation cannot move underneath us
        let knowledge_base = self.status(bot_id).await?;
        if knowledge_base.is_processing() {
            self.claim_orphaned_job(&knowledge_base).await?;
        }

        let document = self.store_document(bot_id, &upload).await?;

        let claimed = self
            .database
            .begin_processing(bot_id)
            .await
            .map_err(|e| KbError::database(&e));
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                self.discard_document(&document).await;
                return Err(KbError::IngestionConflict { bot_id });
            }
            Err(e) => {
                self.discard_document(&document).await;
                return Err(e);
            }
        }

        info!(
            "Accepted {} for bot {} as document {}",
            upload.file_name, bot_id, document.id
        );

        let document_id = document.id;
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move {
            orchestrator
                .run_job(slot, knowledge_base.generation, document)
                .await
        });

        Ok(IngestionJob {
            bot_id,
            document_id,
            handle,
        })
    }

    /// Drop a bot's chunks and documents and return it to `empty`
    #[inline]
    pub async fn delete_knowledge_base(&self, bot_id: i64) -> Result<()> {
        let knowledge_base = self.status(bot_id).await?;
        let _slot = self
            .registry
            .try_acquire(bot_id)
            .ok_or(KbError::IngestionConflict { bot_id })?;

        if knowledge_base.is_processing() {
            self.claim_orphaned_job(&knowledge_base).await?;
        }

        self.vector_index
            .delete_collection(&knowledge_base.collection_name)
            .await?;

        let documents = self
            .database
            .list_documents(bot_id)
            .await
            .map_err(|e| KbError::database(&e))?;
        for document in &documents {
            self.discard_document(document).await;
        }

        let bot_dir = self.documents_dir.join(bot_id.to_string());
        if let Err(e) = tokio::fs::remove_dir(&bot_dir).await {
            debug!("Leaving document directory {}: {}", bot_dir.display(), e);
        }

        self.database
            .reset_knowledge_base(bot_id)
            .await
            .map_err(|e| KbError::database(&e))?;

        info!(
            "Deleted knowledge base contents for bot {} ({} document(s))",
            bot_id,
            documents.len()
        );
        Ok(())
    }

    /// Take over a `processing` row that no local job owns
    ///
    /// A row still receiving heartbeats belongs to another process.
    async fn claim_orphaned_job(&self, knowledge_base: &KnowledgeBase) -> Result<()> {
        let bot_id = knowledge_base.bot_id;

        if !recovery::is_stale(knowledge_base, Utc::now(), self.settings.stale_after()) {
            return Err(KbError::IngestionConflict { bot_id });
        }

        warn!("Taking over interrupted ingestion for bot {}", bot_id);
        self.database
            .fail_if_processing(bot_id, INTERRUPTED_MESSAGE)
            .await
            .map_err(|e| KbError::database(&e))?;
        Ok(())
    }

    /// Copy the upload into managed storage and record it
    async fn store_document(&self, bot_id: i64, upload: &DocumentUpload) -> Result<Document> {
        let bot_dir = self.documents_dir.join(bot_id.to_string());
        tokio::fs::create_dir_all(&bot_dir).await?;

        let storage_path = bot_dir.join(format!("{}.pdf", Uuid::new_v4()));
        let byte_size = tokio::fs::copy(&upload.path, &storage_path).await?;
        debug!(
            "Stored {} as {}",
            upload.path.display(),
            storage_path.display()
        );

        let new_document = NewDocument {
            bot_id,
            file_name: upload.file_name.clone(),
            storage_path: storage_path.to_string_lossy().into_owned(),
            byte_size: i64::try_from(byte_size).unwrap_or(i64::MAX),
        };

        match self.database.insert_document(new_document).await {
            Ok(document) => Ok(document),
            Err(e) => {
                remove_file_logged(&storage_path).await;
                Err(KbError::database(&e))
            }
        }
    }

    /// Remove a document's stored file and row
    async fn discard_document(&self, document: &Document) {
        remove_file_logged(Path::new(&document.storage_path)).await;
        if let Err(e) = self.database.delete_document(document.id).await {
            warn!("Failed to delete document {}: {:#}", document.id, e);
        }
    }

    async fn run_job(self, slot: JobSlot, generation: i64, document: Document) -> JobOutcome {
        let bot_id = slot.bot_id();
        let deadline = Instant::now() + self.settings.job_timeout();
        let heartbeat = self.start_heartbeat(bot_id);

        let outcome = match self.prepare_with_limits(generation, &document, deadline).await {
            Ok(prepared) => self.commit(bot_id, &document, prepared, deadline).await,
            Err(e) => Err(e),
        };
        drop(heartbeat);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                error!("Ingestion for bot {} failed: {}", bot_id, message);

                if let Err(e) = self.database.mark_failed(bot_id, &message).await {
                    error!("Failed to record ingestion failure for bot {}: {:#}", bot_id, e);
                }
                self.discard_document(&document).await;

                JobOutcome::Failed { message }
            }
        };

        // The slot is held until the final status is written
        drop(slot);
        outcome
    }

    /// Run extraction and embedding on their own task, bounded by the job deadline
    async fn prepare_with_limits(
        &self,
        generation: i64,
        document: &Document,
        deadline: Instant,
    ) -> Result<PreparedGeneration> {
        let orchestrator = self.clone();
        let task_document = document.clone();
        let task = tokio::spawn(async move {
            orchestrator.prepare(generation, &task_document).await
        });
        let abort_handle = task.abort_handle();

        match timeout_at(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(KbError::JobPanicked(panic_message(join_error))),
            Err(_) => {
                abort_handle.abort();
                Err(KbError::JobTimeout(self.settings.job_timeout()))
            }
        }
    }

    async fn prepare(&self, generation: i64, document: &Document) -> Result<PreparedGeneration> {
        let bot_id = document.bot_id;
        let collection = collection_name_for(bot_id);

        debug!("Extracting text from document {}", document.id);
        let extracted = self
            .extractor
            .extract(Path::new(&document.storage_path))
            .await?;

        let chunks = chunk_pages(&extracted.pages, &self.chunking);
        if chunks.is_empty() {
            return Err(KbError::Extraction(
                "Document contains no extractable text".to_string(),
            ));
        }
        info!(
            "Document {} for bot {}: {} pages, {} chunks",
            document.id,
            bot_id,
            extracted.page_count,
            chunks.len()
        );

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embeddings.embed_all(&texts).await?;

        let next_generation = generation + 1;
        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let chunk_index = to_u32(chunk.chunk_index)?;
                Ok(ChunkRecord {
                    id: ChunkRecord::stable_id(&collection, next_generation, chunk_index),
                    document_id: document.id,
                    chunk_index,
                    page_number: chunk.page_number,
                    overlap_len: to_u32(chunk.overlap_len)?,
                    text: chunk.text,
                    vector,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PreparedGeneration {
            page_count: extracted.page_count,
            records,
        })
    }

    /// Swap in the new generation, mark it ready, and drop superseded documents
    ///
    /// The swap gets whatever is left of the job deadline. A timed out swap
    /// leaves the previous generation in place.
    async fn commit(
        &self,
        bot_id: i64,
        document: &Document,
        prepared: PreparedGeneration,
        deadline: Instant,
    ) -> Result<JobOutcome> {
        let collection = collection_name_for(bot_id);
        let chunk_count = prepared.records.len();

        timeout_at(
            deadline,
            self.vector_index.replace_collection(&collection, prepared.records),
        )
        .await
        .map_err(|_| KbError::JobTimeout(self.settings.job_timeout()))??;

        if let Err(e) = self
            .database
            .set_document_page_count(document.id, i64::from(prepared.page_count))
            .await
        {
            warn!("Failed to record page count of document {}: {:#}", document.id, e);
        }

        if let Err(e) = self
            .database
            .mark_ready(
                bot_id,
                document.id,
                i64::try_from(chunk_count).unwrap_or(i64::MAX),
            )
            .await
        {
            self.roll_back_swap(bot_id, document).await;
            return Err(KbError::database(&e));
        }

        info!(
            "Knowledge base for bot {} is ready with {} chunks",
            bot_id, chunk_count
        );

        self.discard_superseded(bot_id, document).await;

        Ok(JobOutcome::Ready {
            document_id: document.id,
            page_count: prepared.page_count,
            chunk_count,
        })
    }

    /// Clear a collection whose swap could not be recorded
    ///
    /// The previous generation is already gone, so the knowledge base loses
    /// every chunk and falls back to generation 0.
    async fn roll_back_swap(&self, bot_id: i64, document: &Document) {
        let collection = collection_name_for(bot_id);
        warn!("Rolling back generation swap of {}", collection);

        match timeout(
            self.settings.job_timeout(),
            self.vector_index.delete_collection(&collection),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to clear {} after rollback: {}", collection, e),
            Err(_) => error!("Timed out clearing {} after rollback", collection),
        }

        if let Err(e) = self.database.reset_knowledge_base(bot_id).await {
            error!("Failed to reset knowledge base for bot {}: {:#}", bot_id, e);
        }
        self.discard_superseded(bot_id, document).await;
    }

    /// Drop every document of a bot except `current`
    async fn discard_superseded(&self, bot_id: i64, current: &Document) {
        match self.database.list_documents(bot_id).await {
            Ok(documents) => {
                for superseded in documents.iter().filter(|d| d.id != current.id) {
                    debug!("Discarding superseded document {}", superseded.id);
                    self.discard_document(superseded).await;
                }
            }
            Err(e) => warn!("Failed to list superseded documents: {:#}", e),
        }
    }

    fn start_heartbeat(&self, bot_id: i64) -> HeartbeatGuard {
        let database = self.database.clone();
        let interval = self.settings.heartbeat_interval();

        HeartbeatGuard(tokio::spawn(async move {
            #[expect(
                clippy::infinite_loop,
                reason = "intended to run until handle is aborted"
            )]
            loop {
                sleep(interval).await;
                if let Err(e) = database.heartbeat(bot_id).await {
                    error!("Failed to update heartbeat for bot {}: {:#}", bot_id, e);
                }
            }
        }))
    }
}

/// Reject uploads that can never be ingested
async fn validate_upload(upload: &DocumentUpload, max_bytes: u64) -> Result<()> {
    let is_pdf = Path::new(&upload.file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(KbError::InvalidDocument(format!(
            "{} is not a PDF file",
            upload.file_name
        )));
    }

    let metadata = tokio::fs::metadata(&upload.path).await.map_err(|e| {
        KbError::InvalidDocument(format!("Cannot read {}: {}", upload.path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(KbError::InvalidDocument(format!(
            "{} is not a regular file",
            upload.path.display()
        )));
    }

    let actual = metadata.len();
    if actual == 0 {
        return Err(KbError::InvalidDocument(format!(
            "{} is empty",
            upload.file_name
        )));
    }
    if actual != upload.declared_size {
        return Err(KbError::InvalidDocument(format!(
            "Declared size {} does not match file size {}",
            upload.declared_size, actual
        )));
    }
    if actual > max_bytes {
        return Err(KbError::InvalidDocument(format!(
            "{} is {} bytes, the limit is {}",
            upload.file_name, actual, max_bytes
        )));
    }

    Ok(())
}

async fn remove_file_logged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| KbError::Other(anyhow::anyhow!("Chunk position {} out of range", value)))
}

fn panic_message(error: JoinError) -> String {
    if error.is_cancelled() {
        return "task was cancelled".to_string();
    }

    let payload = error.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
