/// Embedding provider trait, provider error taxonomy and the local FastEmbed backend
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Rate limited by embedding provider")]
    RateLimited,

    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ProviderError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::InvalidInput(_))
    }
}

/// Trait for embedding providers
///
/// Implementations must be safe to call concurrently; callers bound the
/// number of in-flight calls and apply timeouts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Call the provider, treating an elapsed timeout as a provider failure
pub async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, ProviderError> {
    match tokio::time::timeout(timeout, provider.embed(text)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    }
}

#[cfg(feature = "offline")]
pub use fastembed_provider::FastEmbedProvider;

#[cfg(feature = "offline")]
mod fastembed_provider {
    use super::{EmbeddingProvider, ProviderError};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Arc;

    /// FastEmbed provider for local embedding generation
    ///
    /// Uses all-MiniLM-L6-v2 model (384 dimensions) by default.
    /// Inference runs on the blocking pool so async callers are not stalled.
    pub struct FastEmbedProvider {
        model: Arc<TextEmbedding>,
        model_name: String,
        dimension: usize,
    }

    impl FastEmbedProvider {
        /// Create a new FastEmbed provider with the specified model
        ///
        /// **Important**: Models are downloaded on-demand to `~/.cache/huggingface/`
        /// on first use. The smallest model (all-MiniLM-L6-v2) is ~90MB.
        pub fn new(model_name: &str) -> Result<Self, ProviderError> {
            let (embedding_model, dimension) = match model_name {
                "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
                _ => {
                    return Err(ProviderError::InvalidInput(format!(
                        "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                        model_name
                    )));
                }
            };

            tracing::info!(
                "Initializing local embedding model: {} ({}D)",
                model_name,
                dimension
            );

            let init_options =
                InitOptions::new(embedding_model).with_show_download_progress(true);

            let model = TextEmbedding::try_new(init_options)
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

            Ok(Self {
                model: Arc::new(model),
                model_name: model_name.to_string(),
                dimension,
            })
        }

        /// Create provider with default model (all-MiniLM-L6-v2)
        pub fn with_default_model() -> Result<Self, ProviderError> {
            Self::new("all-MiniLM-L6-v2")
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FastEmbedProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            if text.trim().is_empty() {
                return Err(ProviderError::InvalidInput("Empty text".to_string()));
            }

            let model = Arc::clone(&self.model);
            let input = vec![text.to_string()];

            let embeddings = tokio::task::spawn_blocking(move || model.embed(input, None))
                .await
                .map_err(|e| ProviderError::Unavailable(format!("Embedding task failed: {}", e)))?
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

            embeddings.into_iter().next().ok_or_else(|| {
                ProviderError::Unavailable("No embeddings generated".to_string())
            })
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }

}
