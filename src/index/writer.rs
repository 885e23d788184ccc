//! Mutation path: validate, embed, merge, persist, request refresh

use super::RefresherHandle;
use crate::document::{Document, Embedding};
use crate::embedding::{content_hash, ContentHashIndex, EmbeddingGenerator};
use crate::error::Result;
use crate::storage::{CorpusStore, LoadedCorpus};
use ahash::{AHashMap, AHashSet};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A rejected input document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertError {
    pub id: String,
    pub reason: String,
}

/// Result of an upsert call
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertOutcome {
    /// Input documents that passed validation
    pub accepted: usize,
    pub errors: Vec<UpsertError>,
    /// Generation written, `None` when nothing was persisted
    pub generation: Option<u64>,
    /// Accepted documents left without an embedding
    pub without_embedding: Vec<String>,
}

/// Serializes all writes to the corpus store
pub struct IndexWriter {
    store: CorpusStore,
    generator: Arc<EmbeddingGenerator>,
    refresher: RefresherHandle,
    lock: Mutex<()>,
}

impl IndexWriter {
    pub fn new(
        store: CorpusStore,
        generator: Arc<EmbeddingGenerator>,
        refresher: RefresherHandle,
    ) -> Self {
        Self {
            store,
            generator,
            refresher,
            lock: Mutex::new(()),
        }
    }

    /// Validate, embed and merge `documents` into the store
    ///
    /// Invalid documents are reported individually. Within the batch the
    /// last occurrence of an id wins; against the store, the batch wins.
    pub async fn upsert(&self, documents: Vec<Document>) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        let indexed_at = Utc::now();

        let mut batch: Vec<Document> = Vec::with_capacity(documents.len());
        let mut positions: AHashMap<String, usize> = AHashMap::new();
        for mut document in documents {
            if let Err(reason) = document.validate() {
                debug!("Rejected document {:?}: {}", document.id, reason);
                outcome.errors.push(UpsertError {
                    id: document.id,
                    reason,
                });
                continue;
            }

            outcome.accepted += 1;
            document.indexed_at = Some(indexed_at);
            document.dedup_key_phrases();

            match positions.get(&document.id) {
                Some(&index) => batch[index] = document,
                None => {
                    positions.insert(document.id.clone(), batch.len());
                    batch.push(document);
                }
            }
        }

        if batch.is_empty() {
            return Ok(outcome);
        }

        // Provider calls happen before taking the lock
        let current = self.store.load_async().await?;
        let cache = ContentHashIndex::from_embeddings(&current.embeddings);
        let generated = self
            .generator
            .generate(&batch, &cache, current.dimension)
            .await;
        outcome.without_embedding = generated
            .failures
            .iter()
            .map(|failure| failure.document_id.clone())
            .collect();

        let _guard = self.lock.lock().await;
        let latest = self.store.load_async().await?;
        let generation = latest.generation + 1;
        let (documents, embeddings) = merge(latest, batch, generated.embeddings);

        self.store
            .persist_async(documents, embeddings, generation)
            .await?;
        outcome.generation = Some(generation);

        info!(
            "Upserted {} documents ({} rejected, {} without embedding) at generation {}",
            positions.len(),
            outcome.errors.len(),
            outcome.without_embedding.len(),
            generation
        );

        self.refresher.request_refresh();
        Ok(outcome)
    }

    /// Remove documents and their embeddings, returning how many existed
    pub async fn delete(&self, ids: &[String]) -> Result<usize> {
        let doomed: AHashSet<&str> = ids.iter().map(String::as_str).collect();

        let _guard = self.lock.lock().await;
        let latest = self.store.load_async().await?;
        let before = latest.documents.len();

        let documents: Vec<Document> = latest
            .documents
            .into_iter()
            .filter(|doc| !doomed.contains(doc.id.as_str()))
            .collect();
        let removed = before - documents.len();
        if removed == 0 {
            return Ok(0);
        }

        let embeddings: Vec<Embedding> = latest
            .embeddings
            .into_iter()
            .filter(|e| !doomed.contains(e.document_id.as_str()))
            .collect();
        let generation = latest.generation + 1;

        self.store
            .persist_async(documents, embeddings, generation)
            .await?;
        info!("Deleted {} documents at generation {}", removed, generation);

        self.refresher.request_refresh();
        Ok(removed)
    }

    /// Recompute every embedding, ignoring cached vectors
    ///
    /// Vectors are computed without holding the write lock. Documents whose
    /// body changed meanwhile keep the vector written with the change, and
    /// documents whose recomputation fails keep their previous vector when it
    /// still matches the new dimension.
    pub async fn rebuild(&self) -> Result<u64> {
        let current = self.store.load_async().await?;
        info!(
            "Rebuilding embeddings for {} documents",
            current.documents.len()
        );
        let generated = self
            .generator
            .generate(&current.documents, &ContentHashIndex::empty(), None)
            .await;

        let _guard = self.lock.lock().await;
        let latest = self.store.load_async().await?;
        let generation = latest.generation + 1;
        let LoadedCorpus {
            documents,
            embeddings,
            ..
        } = latest;

        let merged = overlay(&documents, embeddings, generated.embeddings, true);
        if merged.kept > 0 {
            warn!(
                "Kept {} previous embeddings that were not recomputed",
                merged.kept
            );
        }

        self.store
            .persist_async(documents, merged.embeddings, generation)
            .await?;
        info!(
            "Rebuild complete at generation {} ({} recomputed)",
            generation, merged.applied
        );

        self.refresher.request_refresh();
        Ok(generation)
    }

    /// Compute embeddings for documents that have none
    ///
    /// Returns the new generation, or `None` if nothing was added.
    pub async fn backfill(&self) -> Result<Option<u64>> {
        let current = self.store.load_async().await?;
        let missing = without_embedding(&current);
        if missing.is_empty() {
            return Ok(None);
        }

        let cache = ContentHashIndex::from_embeddings(&current.embeddings);
        let generated = self
            .generator
            .generate(&missing, &cache, current.dimension)
            .await;
        if generated.embeddings.is_empty() {
            debug!(
                "Backfill computed nothing for {} documents",
                missing.len()
            );
            return Ok(None);
        }

        let _guard = self.lock.lock().await;
        let latest = self.store.load_async().await?;
        let generation = latest.generation + 1;
        let LoadedCorpus {
            documents,
            embeddings,
            ..
        } = latest;

        // An upsert may have embedded some of them in the meantime
        let embedded: AHashSet<String> =
            embeddings.iter().map(|e| e.document_id.clone()).collect();
        let fresh: Vec<Embedding> = generated
            .embeddings
            .into_iter()
            .filter(|e| !embedded.contains(&e.document_id))
            .collect();

        let merged = overlay(&documents, embeddings, fresh, false);
        if merged.applied == 0 {
            debug!("Backfilled vectors were superseded before commit");
            return Ok(None);
        }

        self.store
            .persist_async(documents, merged.embeddings, generation)
            .await?;
        info!(
            "Backfilled {} of {} missing embeddings at generation {}",
            merged.applied,
            missing.len(),
            generation
        );

        self.refresher.request_refresh();
        Ok(Some(generation))
    }
}

/// Run `backfill` on every tick until `stop` fires
///
/// Documents indexed while the provider was down get their vectors from
/// here; a successful backfill asks the refresher to publish them.
pub fn spawn_backfill(
    writer: Arc<IndexWriter>,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    let interval = interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut timer = time::interval_at(time::Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => break,

                _ = timer.tick() => match writer.backfill().await {
                    Ok(Some(generation)) => {
                        debug!("Scheduled backfill wrote generation {}", generation)
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Scheduled backfill failed: {}", e),
                },
            }
        }

        debug!("Backfill task stopped");
    })
}

fn without_embedding(corpus: &LoadedCorpus) -> Vec<Document> {
    let embedded: AHashSet<&str> = corpus
        .embeddings
        .iter()
        .map(|e| e.document_id.as_str())
        .collect();

    corpus
        .documents
        .iter()
        .filter(|doc| !embedded.contains(doc.id.as_str()))
        .cloned()
        .collect()
}

struct Overlay {
    embeddings: Vec<Embedding>,
    /// Fresh vectors written
    applied: usize,
    /// Stored vectors carried over
    kept: usize,
}

/// Lay vectors computed outside the lock over the stored ones
///
/// A fresh vector is dropped when its document was removed or its body
/// changed after it was computed. Vectors from either side that disagree
/// with the winning dimension are dropped.
fn overlay(
    documents: &[Document],
    stored: Vec<Embedding>,
    fresh: Vec<Embedding>,
    fresh_dimension_wins: bool,
) -> Overlay {
    let hashes: AHashMap<&str, String> = documents
        .iter()
        .map(|doc| (doc.id.as_str(), content_hash(&doc.body)))
        .collect();

    let fresh: Vec<Embedding> = fresh
        .into_iter()
        .filter(|e| {
            let current = hashes.get(e.document_id.as_str()) == Some(&e.content_hash);
            if !current {
                debug!("Discarding vector for {}: document changed", e.document_id);
            }
            current
        })
        .collect();

    let fresh_dimension = fresh.first().map(Embedding::dimension);
    let stored_dimension = stored.first().map(Embedding::dimension);
    let dimension = if fresh_dimension_wins {
        fresh_dimension.or(stored_dimension)
    } else {
        stored_dimension.or(fresh_dimension)
    };
    let fits = |e: &Embedding| dimension.map_or(true, |d| d == e.dimension());

    let replaced: AHashSet<String> = fresh
        .iter()
        .filter(|e| fits(e))
        .map(|e| e.document_id.clone())
        .collect();
    let mut embeddings: Vec<Embedding> = stored
        .into_iter()
        .filter(|e| !replaced.contains(&e.document_id) && fits(e))
        .collect();
    let kept = embeddings.len();

    let offered = fresh.len();
    embeddings.extend(fresh.into_iter().filter(|e| fits(e)));
    let applied = embeddings.len() - kept;
    if applied < offered {
        warn!(
            "Dropped {} vectors with a mismatched dimension",
            offered - applied
        );
    }

    Overlay {
        embeddings,
        applied,
        kept,
    }
}

/// Merge a validated batch into the stored corpus, batch winning by id
fn merge(
    latest: LoadedCorpus,
    batch: Vec<Document>,
    generated: Vec<Embedding>,
) -> (Vec<Document>, Vec<Embedding>) {
    let mut documents = latest.documents;
    let mut positions: AHashMap<String, usize> = documents
        .iter()
        .enumerate()
        .map(|(index, doc)| (doc.id.clone(), index))
        .collect();

    let replaced: AHashSet<String> = batch.iter().map(|doc| doc.id.clone()).collect();
    for document in batch {
        match positions.get(&document.id) {
            Some(&index) => documents[index] = document,
            None => {
                positions.insert(document.id.clone(), documents.len());
                documents.push(document);
            }
        }
    }

    let mut embeddings: Vec<Embedding> = latest
        .embeddings
        .into_iter()
        .filter(|e| !replaced.contains(&e.document_id))
        .collect();

    let dimension = embeddings.first().map(Embedding::dimension);
    for embedding in generated {
        if dimension.is_some_and(|d| d != embedding.dimension()) {
            warn!(
                "Store dimension changed during upsert; {} left without embedding",
                embedding.document_id
            );
            continue;
        }
        embeddings.push(embedding);
    }

    (documents, embeddings)
}
