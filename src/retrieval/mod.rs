// Retrieval engine
// Turns a question into ranked, deduplicated context from a bot's knowledge base

pub mod context;


use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::database::sqlite::{Database, KnowledgeBase};
use crate::database::vector_index::{ScoredRecord, VectorIndex};
use crate::embeddings::EmbeddingService;
use crate::{KbError, Result};

pub use context::{CONTEXT_SEPARATOR, assemble_context, deduplicate, truncate_chars};

/// Questions used to sample a knowledge base for a preview
pub const PREVIEW_PROBES: [&str; 6] = [
    "company about us overview",
    "name founded team",
    "what we do services business",
    "contact email support",
    "mission vision values",
    "products solutions",
];
const PREVIEW_RESULTS_PER_PROBE: usize = 3;
const PREVIEW_MIN_CHUNK_CHARS: usize = 50;
const PREVIEW_MIN_CHUNKS: usize = 3;
const PREVIEW_TOP_UP_FETCH: usize = 5;
const PREVIEW_MAX_CHUNKS: usize = 6;
const PREVIEW_MAX_CHARS: usize = 2500;
pub const PREVIEW_SEPARATOR: &str = "\n\n---DOCUMENT SECTION---\n\n";
pub const PREVIEW_TRUNCATION_NOTE: &str =
    "...\n\n[Content truncated - more documents available in knowledge base]";

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOptions {
    /// Nearest neighbours fetched before filtering
    pub k: usize,
    pub max_context_chars: usize,
    pub similarity_threshold: f32,
    pub timeout: Duration,
}

impl Default for RetrievalOptions {
    #[inline]
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrievalOptions {
    #[inline]
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k: config.top_k,
            max_context_chars: config.max_context_chars,
            similarity_threshold: config.similarity_threshold,
            timeout: config.timeout(),
        }
    }
}

/// Where a piece of the context came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub document_id: i64,
    pub chunk_index: u32,
    pub page_number: u32,
    pub score: f32,
}

impl From<&ScoredRecord> for Citation {
    #[inline]
    fn from(hit: &ScoredRecord) -> Self {
        Self {
            document_id: hit.record.document_id,
            chunk_index: hit.record.chunk_index,
            page_number: hit.record.page_number,
            score: hit.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// Relevant hits in descending score order
    pub hits: Vec<ScoredRecord>,
    pub context: String,
    /// Hits that made it into `context`, in the same order
    pub citations: Vec<Citation>,
    /// False when nothing relevant was found; the caller should say so
    /// instead of answering
    pub grounded: bool,
}

impl RetrievalResult {
    fn ungrounded() -> Self {
        Self {
            hits: Vec::new(),
            context: String::new(),
            citations: Vec::new(),
            grounded: false,
        }
    }
}

/// Answer-time search over committed knowledge bases
#[derive(Clone)]
pub struct Retriever {
    database: Database,
    vector_index: Arc<dyn VectorIndex>,
    embeddings: Arc<EmbeddingService>,
}

impl std::fmt::Debug for Retriever {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embeddings", &self.embeddings)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    #[inline]
    pub fn new(
        database: Database,
        vector_index: Arc<dyn VectorIndex>,
        embeddings: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            database,
            vector_index,
            embeddings,
        }
    }

    /// Find context for `question` in the bot's knowledge base
    ///
    /// Fails with [`KbError::NotReady`] unless a committed generation exists,
    /// and with [`KbError::RetrievalTimeout`] when embedding plus search take
    /// longer than `options.timeout`.
    #[inline]
    pub async fn retrieve(
        &self,
        bot_id: i64,
        question: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievalResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(KbError::InvalidQuery("question is empty".to_string()));
        }

        let knowledge_base = self.servable_knowledge_base(bot_id).await?;

        let result = tokio::time::timeout(
            options.timeout,
            self.search(&knowledge_base.collection_name, question, options),
        )
        .await
        .map_err(|_| {
            warn!(
                "Retrieval for bot {} timed out after {:?}",
                bot_id, options.timeout
            );
            KbError::RetrievalTimeout(options.timeout)
        })??;

        info!(
            "Retrieved {} chunk(s) for bot {} (grounded: {})",
            result.citations.len(),
            bot_id,
            result.grounded
        );
        Ok(result)
    }

    /// Sample a knowledge base for a description of what it contains
    ///
    /// Returns `None` when the knowledge base has no committed content.
    #[inline]
    pub async fn preview(&self, bot_id: i64) -> Result<Option<String>> {
        let knowledge_base = match self.servable_knowledge_base(bot_id).await {
            Ok(knowledge_base) => knowledge_base,
            Err(KbError::NotReady { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let collection = knowledge_base.collection_name.as_str();

        let mut seen = HashSet::new();
        let mut chunks: Vec<String> = Vec::new();

        for probe in PREVIEW_PROBES {
            let hits = match self.probe(collection, probe).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!("Preview probe '{}' failed: {}", probe, e);
                    continue;
                }
            };

            for hit in hits {
                let text = hit.record.text;
                if text.trim().chars().count() > PREVIEW_MIN_CHUNK_CHARS && seen.insert(text.clone())
                {
                    chunks.push(text);
                }
            }
        }

        if chunks.len() < PREVIEW_MIN_CHUNKS {
            debug!(
                "Preview probes found {} chunk(s), topping up from the start of {}",
                chunks.len(),
                collection
            );
            match self
                .vector_index
                .list(collection, PREVIEW_TOP_UP_FETCH)
                .await
            {
                Ok(records) => {
                    for record in records.into_iter().take(PREVIEW_MIN_CHUNKS) {
                        if seen.insert(record.text.clone()) {
                            chunks.push(record.text);
                        }
                    }
                }
                Err(e) => warn!("Failed to list chunks of {}: {}", collection, e),
            }
        }

        if chunks.is_empty() {
            return Ok(None);
        }

        chunks.truncate(PREVIEW_MAX_CHUNKS);
        let mut preview = chunks.join(PREVIEW_SEPARATOR);
        if preview.chars().count() > PREVIEW_MAX_CHARS {
            preview = format!(
                "{}{}",
                truncate_chars(&preview, PREVIEW_MAX_CHARS),
                PREVIEW_TRUNCATION_NOTE
            );
        }

        info!(
            "Built preview for bot {} from {} chunk(s), {} characters",
            bot_id,
            chunks.len(),
            preview.chars().count()
        );
        Ok(Some(preview))
    }

    async fn servable_knowledge_base(&self, bot_id: i64) -> Result<KnowledgeBase> {
        let knowledge_base = self
            .database
            .get_knowledge_base(bot_id)
            .await
            .map_err(|e| KbError::database(&e))?
            .ok_or(KbError::BotNotFound(bot_id))?;

        if !knowledge_base.is_servable() {
            return Err(KbError::NotReady {
                bot_id,
                status: knowledge_base.status,
            });
        }

        Ok(knowledge_base)
    }

    async fn search(
        &self,
        collection: &str,
        question: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievalResult> {
        let vector = self.embeddings.embed_query(question).await?;
        let mut hits = self
            .vector_index
            .query(collection, &vector, options.k)
            .await?;

        let fetched = hits.len();
        hits.retain(|hit| hit.score >= options.similarity_threshold);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        let hits = deduplicate(hits);
        debug!(
            "{} of {} hit(s) in {} passed the threshold {} and deduplication",
            hits.len(),
            fetched,
            collection,
            options.similarity_threshold
        );

        if hits.is_empty() {
            return Ok(RetrievalResult::ungrounded());
        }

        let (context, included) = assemble_context(&hits, options.max_context_chars);
        let citations: Vec<Citation> = hits.iter().take(included).map(Citation::from).collect();

        Ok(RetrievalResult {
            grounded: !citations.is_empty(),
            hits,
            context,
            citations,
        })
    }

    async fn probe(&self, collection: &str, probe: &str) -> Result<Vec<ScoredRecord>> {
        let vector = self.embeddings.embed_query(probe).await?;
        self.vector_index
            .query(collection, &vector, PREVIEW_RESULTS_PER_PROBE)
            .await
    }
}
