/// Embedding generation
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction over remote and local models
/// - ApiEmbeddingProvider for OpenAI-compatible HTTP endpoints
/// - FastEmbedProvider for local embedding (feature `offline`)
/// - EmbeddingGenerator for cached, concurrency-bounded generation with retry
mod api;
mod generator;
mod provider;

pub use api::ApiEmbeddingProvider;
pub use generator::{
    content_hash, normalize_text, ContentHashIndex, EmbeddingGenerator, GenerationFailure,
    GenerationOutcome, GeneratorSettings,
};
pub use provider::{embed_with_timeout, EmbeddingProvider, ProviderError};

#[cfg(feature = "offline")]
pub use provider::FastEmbedProvider;

use crate::config::EmbeddingConfig;
use crate::error::{QuarryError, Result};
use std::sync::Arc;

/// Build the provider selected by `embedding.mode`
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.mode.as_str() {
        "online" => Ok(Arc::new(ApiEmbeddingProvider::from_config(config)?)),
        #[cfg(feature = "offline")]
        "offline" => Ok(Arc::new(
            FastEmbedProvider::new(&config.model).map_err(QuarryError::Provider)?,
        )),
        #[cfg(not(feature = "offline"))]
        "offline" => Err(QuarryError::Config(
            "Offline embedding requires building with the `offline` feature".to_string(),
        )),
        other => Err(QuarryError::Config(format!(
            "Unknown embedding mode: {}",
            other
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{EmbeddingProvider, ProviderError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Deterministic in-process provider
    ///
    /// Hashes each lowercase alphanumeric token into one of `dimension`
    /// buckets, so texts sharing words get similar vectors.
    pub struct ScriptedProvider {
        dimension: usize,
        latency: Option<Duration>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        unavailable: AtomicBool,
        scripted_failures: Mutex<Vec<ProviderError>>,
    }

    impl ScriptedProvider {
        pub fn new(dimension: usize) -> Self {
            Self {
                dimension,
                latency: None,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                unavailable: AtomicBool::new(false),
                scripted_failures: Mutex::new(Vec::new()),
            }
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        /// Fail the next `count` calls with `error`
        pub fn fail_next(&self, count: usize, error: ProviderError) {
            let mut failures = self.scripted_failures.lock().unwrap();
            failures.extend(std::iter::repeat(error).take(count));
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut vector = vec![0.0; self.dimension];
            for token in text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
            {
                let token = token.to_lowercase();
                let hash = blake3::hash(token.as_bytes());
                let bytes = hash.as_bytes();
                let bucket = u64::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6],
                    bytes[7],
                ]) as usize
                    % self.dimension;
                vector[bucket] += 1.0;
            }
            vector
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let scripted = {
                let mut failures = self.scripted_failures.lock().unwrap();
                if failures.is_empty() {
                    None
                } else {
                    Some(failures.remove(0))
                }
            };
            if let Some(error) = scripted {
                return Err(error);
            }
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(ProviderError::Unavailable("scripted outage".to_string()));
            }

            Ok(self.vector_for(text))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }
}
