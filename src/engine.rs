//! Engine facade: the surface upstream callers use
//!
//! Owns the refresher and backfill tasks and wires the writer, executor
//! and generator to one corpus store and one embedding provider.

use crate::config::{parse_duration, Config};
use crate::document::Document;
use crate::embedding::{
    provider_from_config, EmbeddingGenerator, EmbeddingProvider, GeneratorSettings,
};
use crate::error::Result;
use crate::index::{
    spawn_backfill, spawn_refresher, IndexSnapshot, IndexWriter, RefreshState, RefresherHandle,
    UpsertOutcome,
};
use crate::retrieval::{ScoringConfig, SearchExecutor, SearchRequest, SearchResponse};
use crate::storage::{open_object_store, CorpusStore, ObjectStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub document_count: usize,
    pub embedding_count: usize,
    pub generation: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_refresh_error: Option<String>,
    pub state: RefreshState,
    pub backend: String,
    pub model: String,
}

/// Hybrid search and embedding index engine
pub struct Engine {
    store: CorpusStore,
    provider: Arc<dyn EmbeddingProvider>,
    executor: SearchExecutor,
    writer: Arc<IndexWriter>,
    refresher: RefresherHandle,
    refresher_task: Mutex<Option<JoinHandle<()>>>,
    backfill_stop: Mutex<Option<oneshot::Sender<()>>>,
    backfill_task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Open the configured store and provider
    pub async fn from_config(config: &Config) -> Result<Self> {
        let objects = open_object_store(&config.storage)?;
        let provider = provider_from_config(&config.embedding)?;
        Self::new(objects, provider, config).await
    }

    /// Build an engine over an explicit store and provider
    ///
    /// Loads the store once so the first query sees persisted data.
    pub async fn new(
        objects: Arc<dyn ObjectStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Result<Self> {
        let store = CorpusStore::new(objects, config.storage.compression_threshold);
        let settings = GeneratorSettings::from_config(&config.embedding)?;
        let generator = Arc::new(EmbeddingGenerator::new(provider.clone(), settings));

        let initial = Arc::new(IndexSnapshot::build(store.load_async().await?));
        tracing::info!(
            "Opened {} store at generation {} ({} documents, {} embeddings)",
            store.backend_name(),
            initial.generation(),
            initial.document_count(),
            initial.embedding_count()
        );

        let interval = parse_duration(&config.refresh.interval)?;
        let (refresher, task) = spawn_refresher(store.clone(), initial, interval);

        let executor = SearchExecutor::new(
            generator.clone(),
            ScoringConfig::from(&config.search),
            config.search.default_max_results,
            parse_duration(&config.search.query_timeout)?,
        );
        let writer = Arc::new(IndexWriter::new(store.clone(), generator, refresher.clone()));

        // Documents left without a vector are retried on the refresh schedule
        let (backfill_stop, stop_rx) = oneshot::channel();
        let backfill_task = spawn_backfill(writer.clone(), interval, stop_rx);

        Ok(Self {
            store,
            provider,
            executor,
            writer,
            refresher,
            refresher_task: Mutex::new(Some(task)),
            backfill_stop: Mutex::new(Some(backfill_stop)),
            backfill_task: Mutex::new(Some(backfill_task)),
        })
    }

    /// Search the current snapshot
    ///
    /// The snapshot is captured once; a refresh during the query does not
    /// affect it.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let snapshot = self.refresher.current();
        self.executor.execute(&snapshot, &request).await
    }

    /// Insert or replace documents
    pub async fn upsert(&self, documents: Vec<Document>) -> Result<UpsertOutcome> {
        self.writer.upsert(documents).await
    }

    /// Remove documents by id, returning how many were removed
    pub async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.writer.delete(ids).await
    }

    pub fn status(&self) -> EngineStatus {
        let snapshot = self.refresher.current();
        let refresher = self.refresher.status();

        EngineStatus {
            document_count: snapshot.document_count(),
            embedding_count: snapshot.embedding_count(),
            generation: snapshot.generation(),
            last_refresh_at: refresher.last_refresh_at,
            last_refresh_error: refresher.last_refresh_error,
            state: refresher.state,
            backend: self.store.backend_name().to_string(),
            model: self.provider.model_name().to_string(),
        }
    }

    /// Fill missing embeddings, then reload and publish a snapshot
    ///
    /// A failed backfill does not prevent the reload; its error surfaces
    /// through the refresh if the store itself is unreadable.
    pub async fn force_refresh(&self) -> Result<u64> {
        match self.writer.backfill().await {
            Ok(Some(generation)) => tracing::info!("Backfill wrote generation {}", generation),
            Ok(None) => {}
            Err(e) => tracing::warn!("Backfill skipped: {}", e),
        }
        self.refresher.refresh_now().await
    }

    /// Recompute all embeddings and publish the result
    pub async fn rebuild(&self) -> Result<u64> {
        self.writer.rebuild().await?;
        self.refresher.refresh_now().await
    }

    /// The snapshot currently serving queries
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.refresher.current()
    }

    /// Stop the background tasks and wait for them to exit
    pub async fn shutdown(&self) {
        let stop = self.backfill_stop.lock().ok().and_then(|mut stop| stop.take());
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        let task = self.backfill_task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Backfill task ended abnormally: {}", e);
            }
        }

        self.refresher.shutdown().await;

        let task = self
            .refresher_task
            .lock()
            .ok()
            .and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Refresher task ended abnormally: {}", e);
            }
        }
    }
}
