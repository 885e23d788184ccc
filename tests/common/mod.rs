use async_trait::async_trait;
use quarry::config::Config;
use quarry::embedding::{EmbeddingProvider, ProviderError};
use quarry::engine::Engine;
use quarry::storage::ObjectStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Bag-of-words hashing provider with a switchable outage
pub struct TestProvider {
    dimension: usize,
    calls: AtomicUsize,
    down: AtomicBool,
}

#[allow(dead_code)]
impl TestProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for TestProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("test outage".to_string()));
        }

        let mut vector = vec![0.0; self.dimension];
        for token in quarry::retrieval::tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bucket = hash.as_bytes()[0] as usize % self.dimension;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "test-bag-of-words"
    }
}

/// Defaults with fast retries and a refresh interval long enough to stay out of the way
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.backoff_base = "1ms".to_string();
    config.embedding.backoff_max = "2ms".to_string();
    config.embedding.request_timeout = "2s".to_string();
    config.search.query_timeout = "1s".to_string();
    config.refresh.interval = "1h".to_string();
    config
}

#[allow(dead_code)]
pub async fn engine_with(
    objects: Arc<dyn ObjectStore>,
    provider: Arc<TestProvider>,
) -> Engine {
    engine_with_config(objects, provider, &test_config()).await
}

#[allow(dead_code)]
pub async fn engine_with_config(
    objects: Arc<dyn ObjectStore>,
    provider: Arc<TestProvider>,
    config: &Config,
) -> Engine {
    Engine::new(objects, provider, config)
        .await
        .expect("Failed to build engine")
}
