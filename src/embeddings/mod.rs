// Embeddings module
// Provider trait, retry/batching policy and the Ollama provider


pub mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::OllamaConfig;

pub use ollama::OllamaEmbedder;

/// Failure of a single provider round-trip, classified for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Rate limiting, server errors and transport failures
    #[error("Transient embedding failure: {0}")]
    Transient(String),

    /// Client errors, authentication problems and malformed responses
    #[error("Permanent embedding failure: {0}")]
    Permanent(String),

    #[error("Embedding failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl EmbeddingError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One provider round-trip for one batch of texts
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per input in the same order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Model identifier, for logging
    fn model_name(&self) -> &str;
}

/// Backoff schedule for transient embedding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per batch, including the first
    pub retry_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn from_config(config: &OllamaConfig) -> Self {
        Self {
            retry_attempts: config.retry_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after the given failed attempt (1-based)
    #[inline]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_backoff)
    }
}

/// Batching and retry policy around an [`Embedder`]
#[derive(Clone)]
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    policy: RetryPolicy,
    expected_dimension: Option<usize>,
}

impl std::fmt::Debug for EmbeddingService {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("model", &self.embedder.model_name())
            .field("batch_size", &self.batch_size)
            .field("policy", &self.policy)
            .field("expected_dimension", &self.expected_dimension)
            .finish()
    }
}

impl EmbeddingService {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize, policy: RetryPolicy) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            policy,
            expected_dimension: None,
        }
    }

    /// Reject vectors whose length differs from `dimension`
    #[inline]
    pub fn with_expected_dimension(mut self, dimension: usize) -> Self {
        self.expected_dimension = Some(dimension);
        self
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Embed every text, in order
    ///
    /// Either all vectors are returned or none are. Every returned vector has
    /// the same dimension.
    #[inline]
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts with {} (batch size {})",
            texts.len(),
            self.embedder.model_name(),
            self.batch_size
        );

        let mut vectors = Vec::with_capacity(texts.len());
        let mut dimension = self.expected_dimension;

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let batch_vectors = self.embed_batch_with_retry(batch).await?;

            if batch_vectors.len() != batch.len() {
                return Err(EmbeddingError::Permanent(format!(
                    "Mismatch between request and response counts: {} vs {}",
                    batch.len(),
                    batch_vectors.len()
                )));
            }

            for vector in &batch_vectors {
                if vector.is_empty() {
                    return Err(EmbeddingError::Permanent(
                        "Provider returned an empty embedding".to_string(),
                    ));
                }
                match dimension {
                    Some(expected) if expected != vector.len() => {
                        return Err(EmbeddingError::Permanent(format!(
                            "Embedding dimension mismatch in batch {}: expected {}, got {}",
                            batch_index,
                            expected,
                            vector.len()
                        )));
                    }
                    Some(_) => {}
                    None => dimension = Some(vector.len()),
                }
            }

            vectors.extend(batch_vectors);
        }

        debug!("Generated {} embeddings total", vectors.len());
        Ok(vectors)
    }

    /// Embed a single question
    #[inline]
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_all(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::Permanent("Provider returned no embedding".to_string()))
    }

    async fn embed_batch_with_retry(
        &self,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let attempts = self.policy.retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!("Embedding batch attempt {}/{}", attempt, attempts);

            match self.embedder.embed_batch(batch).await {
                Ok(vectors) => {
                    if attempt > 1 {
                        debug!("Embedding batch succeeded on attempt {}", attempt);
                    }
                    return Ok(vectors);
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        "Transient embedding error, attempt {}/{}: {}",
                        attempt, attempts, error
                    );
                    last_error = Some(error);

                    if attempt < attempts {
                        let delay = self.policy.backoff_for(attempt);
                        debug!("Waiting {:?} before retry", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => {
                    warn!("Non-retryable embedding error: {}", error);
                    return Err(error);
                }
            }
        }

        error!("All {} embedding attempts failed", attempts);

        Err(EmbeddingError::Exhausted {
            attempts,
            last_error: last_error.map_or_else(|| "unknown error".to_string(), |e| e.to_string()),
        })
    }
}
