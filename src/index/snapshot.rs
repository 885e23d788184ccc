//! Immutable searchable view of the corpus

use crate::document::Document;
use crate::retrieval::term_set;
use crate::storage::LoadedCorpus;
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One document with its precomputed search inputs
#[derive(Debug)]
pub struct IndexEntry {
    pub document: Arc<Document>,
    /// Distinct terms of title, summary and body
    pub terms: AHashSet<String>,
    pub embedding: Option<Arc<Vec<f32>>>,
}

/// Documents and embeddings as of one store load
///
/// Never mutated after construction; readers hold an `Arc` for the
/// duration of a query.
#[derive(Debug)]
pub struct IndexSnapshot {
    generation: u64,
    loaded_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
    dimension: Option<usize>,
    embedding_count: usize,
}

impl IndexSnapshot {
    /// Snapshot of an empty corpus at generation 0
    pub fn empty() -> Self {
        Self {
            generation: 0,
            loaded_at: Utc::now(),
            entries: Vec::new(),
            dimension: None,
            embedding_count: 0,
        }
    }

    /// Build a snapshot from reconciled store contents
    pub fn build(corpus: LoadedCorpus) -> Self {
        let mut vectors: AHashMap<String, Arc<Vec<f32>>> = corpus
            .embeddings
            .into_iter()
            .map(|embedding| (embedding.document_id, Arc::new(embedding.vector)))
            .collect();

        let entries: Vec<IndexEntry> = corpus
            .documents
            .into_iter()
            .map(|document| IndexEntry {
                terms: term_set(&document.searchable_text()),
                embedding: vectors.remove(&document.id),
                document: Arc::new(document),
            })
            .collect();

        let embedding_count = entries.iter().filter(|e| e.embedding.is_some()).count();

        Self {
            generation: corpus.generation,
            loaded_at: Utc::now(),
            entries,
            dimension: corpus.dimension,
            embedding_count,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn document_count(&self) -> usize {
        self.entries.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.embedding_count
    }

    /// Dimension shared by every embedding, `None` when there are none
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|entry| entry.document.id == id)
    }
}
