/// Content-hash embedding cache and bounded-concurrency generator
use super::{EmbeddingProvider, ProviderError};
use crate::config::{parse_duration, EmbeddingConfig};
use crate::document::{Document, Embedding};
use crate::error::Result;
use ahash::AHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Collapse whitespace runs so formatting-only edits keep the same hash
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// BLAKE3 hash (hex) of the normalized body text
pub fn content_hash(text: &str) -> String {
    blake3::hash(normalize_text(text).as_bytes())
        .to_hex()
        .to_string()
}

/// Lookup of known vectors keyed by content hash
#[derive(Debug, Default, Clone)]
pub struct ContentHashIndex {
    vectors: AHashMap<String, Arc<Vec<f32>>>,
}

impl ContentHashIndex {
    /// An index with nothing cached; every document is a miss
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_embeddings(embeddings: &[Embedding]) -> Self {
        let mut vectors = AHashMap::with_capacity(embeddings.len());
        for embedding in embeddings {
            vectors
                .entry(embedding.content_hash.clone())
                .or_insert_with(|| Arc::new(embedding.vector.clone()));
        }
        Self { vectors }
    }

    pub fn get(&self, hash: &str) -> Option<&Arc<Vec<f32>>> {
        self.vectors.get(hash)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Tunables for embedding generation
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Simultaneous in-flight provider calls
    pub max_concurrent: usize,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl GeneratorSettings {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            max_concurrent: config.max_concurrent.max(1),
            request_timeout: parse_duration(&config.request_timeout)?,
            max_attempts: config.max_attempts.max(1),
            backoff_base: parse_duration(&config.backoff_base)?,
            backoff_max: parse_duration(&config.backoff_max)?,
        })
    }
}

/// A document left without an embedding
#[derive(Debug, Clone)]
pub struct GenerationFailure {
    pub document_id: String,
    pub reason: String,
}

/// Result of one generation run
#[derive(Debug, Default)]
pub struct GenerationOutcome {
    /// One embedding per document that has a vector
    pub embeddings: Vec<Embedding>,
    pub cache_hits: usize,
    /// Distinct texts sent to the provider
    pub requested: usize,
    pub failures: Vec<GenerationFailure>,
    pub duration_ms: u64,
}

/// Single provider attempt, classified for the retry loop
enum Attempt {
    Success(Vec<f32>),
    Retryable(ProviderError),
    Fatal(ProviderError),
}

impl From<std::result::Result<Vec<f32>, ProviderError>> for Attempt {
    fn from(result: std::result::Result<Vec<f32>, ProviderError>) -> Self {
        match result {
            Ok(vector) => Attempt::Success(vector),
            Err(e) if e.is_retryable() => Attempt::Retryable(e),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

/// Embedding generator
///
/// Computes vectors only for content hashes that are not already known,
/// deduplicates identical text within a run, and keeps at most
/// `max_concurrent` provider calls in flight across all callers.
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    semaphore: Arc<Semaphore>,
    settings: GeneratorSettings,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: GeneratorSettings) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            provider,
            semaphore,
            settings,
        }
    }

    /// Compute embeddings for `documents`, reusing vectors from `cache`
    ///
    /// `expected_dimension` is the store's dimension; when `None` the first
    /// vector produced fixes it for this run.
    pub async fn generate(
        &self,
        documents: &[Document],
        cache: &ContentHashIndex,
        expected_dimension: Option<usize>,
    ) -> GenerationOutcome {
        let start = Instant::now();
        let mut outcome = GenerationOutcome::default();
        let mut dimension = expected_dimension;

        // (hash, normalized text, document ids) in first-seen order
        let mut pending: Vec<(String, String, Vec<String>)> = Vec::new();
        let mut pending_by_hash: AHashMap<String, usize> = AHashMap::new();

        for doc in documents {
            let normalized = normalize_text(&doc.body);
            let hash = blake3::hash(normalized.as_bytes()).to_hex().to_string();

            if let Some(vector) = cache.get(&hash) {
                if dimension.is_some_and(|d| d != vector.len()) {
                    warn!(
                        "Cached vector for {} has dimension {}, expected {:?}; recomputing",
                        doc.id,
                        vector.len(),
                        dimension
                    );
                } else {
                    dimension.get_or_insert(vector.len());
                    outcome.cache_hits += 1;
                    outcome.embeddings.push(Embedding {
                        document_id: doc.id.clone(),
                        content_hash: hash,
                        vector: vector.as_ref().clone(),
                    });
                    continue;
                }
            }

            match pending_by_hash.get(&hash) {
                Some(&slot) => pending[slot].2.push(doc.id.clone()),
                None => {
                    pending_by_hash.insert(hash.clone(), pending.len());
                    pending.push((hash, normalized, vec![doc.id.clone()]));
                }
            }
        }

        outcome.requested = pending.len();
        if !pending.is_empty() {
            info!(
                "Generating {} embeddings ({} cache hits, concurrency {})",
                pending.len(),
                outcome.cache_hits,
                self.settings.max_concurrent
            );
        }

        let results = futures::future::join_all(
            pending
                .iter()
                .map(|(_, text, _)| self.embed_with_retry(text)),
        )
        .await;

        for ((hash, _, ids), result) in pending.into_iter().zip(results) {
            match result {
                Ok(vector) if dimension.is_some_and(|d| d != vector.len()) => {
                    let reason = format!(
                        "Dimension mismatch: expected {}, got {}",
                        dimension.unwrap_or_default(),
                        vector.len()
                    );
                    warn!("Discarding vector for {:?}: {}", ids, reason);
                    outcome.failures.extend(ids.into_iter().map(|document_id| {
                        GenerationFailure {
                            document_id,
                            reason: reason.clone(),
                        }
                    }));
                }
                Ok(vector) => {
                    dimension.get_or_insert(vector.len());
                    for document_id in ids {
                        outcome.embeddings.push(Embedding {
                            document_id,
                            content_hash: hash.clone(),
                            vector: vector.clone(),
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        "Embedding failed for {:?}, indexing without vector: {}",
                        ids, e
                    );
                    outcome.failures.extend(ids.into_iter().map(|document_id| {
                        GenerationFailure {
                            document_id,
                            reason: e.to_string(),
                        }
                    }));
                }
            }
        }

        outcome.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Generation complete: {} embeddings, {} failures, {}ms",
            outcome.embeddings.len(),
            outcome.failures.len(),
            outcome.duration_ms
        );

        outcome
    }

    /// Embed query text with a single timeout-bounded attempt
    ///
    /// The timeout covers waiting for a concurrency permit as well.
    pub async fn embed_query(
        &self,
        text: &str,
        timeout: Duration,
    ) -> std::result::Result<Vec<f32>, ProviderError> {
        let normalized = normalize_text(text);
        let call = async {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| ProviderError::Unavailable("Generator shut down".to_string()))?;
            self.provider.embed(&normalized).await
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        }
    }

    /// Bounded retry loop with exponential backoff
    async fn embed_with_retry(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut delay = self.settings.backoff_base;
        let mut attempt = 1;

        loop {
            match self.attempt(text).await {
                Attempt::Success(vector) => return Ok(vector),
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retryable(e) if attempt >= max_attempts => return Err(e),
                Attempt::Retryable(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Embedding request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.settings.backoff_max);
                    attempt += 1;
                }
            }
        }
    }

    /// One permit-holding, timeout-bounded provider call
    async fn attempt(&self, text: &str) -> Attempt {
        let permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Attempt::Fatal(ProviderError::Unavailable(
                    "Generator shut down".to_string(),
                ))
            }
        };

        let result = super::embed_with_timeout(
            self.provider.as_ref(),
            text,
            self.settings.request_timeout,
        )
        .await;
        drop(permit);

        Attempt::from(result)
    }
}
