//! Document and embedding records on top of an object store
//!
//! Each logical key holds one self-describing record, fully replaced on
//! every persist. Embeddings are written before documents, so the
//! documents record is the commit point for backends without transactions.

use super::{ObjectStore, DOCUMENTS_KEY, EMBEDDINGS_KEY};
use crate::document::{Document, Embedding};
use crate::embedding::content_hash;
use crate::error::{QuarryError, Result};
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const RECORD_FORMAT: &str = "quarry-corpus";
pub const RECORD_SCHEMA_VERSION: u32 = 1;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const ZSTD_LEVEL: i32 = 3;

/// Self-describing record stored under one logical key
#[derive(Debug, Serialize, Deserialize)]
pub struct Record<T> {
    pub format: String,
    pub schema_version: u32,
    pub generation: u64,
    pub written_at: DateTime<Utc>,
    pub items: Vec<T>,
}

/// Reconciled store contents
#[derive(Debug, Default, Clone)]
pub struct LoadedCorpus {
    pub documents: Vec<Document>,
    pub embeddings: Vec<Embedding>,
    pub generation: u64,
    /// Dimension shared by every kept embedding
    pub dimension: Option<usize>,
    /// Embeddings discarded during reconciliation
    pub dropped_embeddings: usize,
}

/// Authoritative document/embedding store
#[derive(Clone)]
pub struct CorpusStore {
    objects: Arc<dyn ObjectStore>,
    compression_threshold: usize,
}

impl CorpusStore {
    pub fn new(objects: Arc<dyn ObjectStore>, compression_threshold: usize) -> Self {
        Self {
            objects,
            compression_threshold,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.objects.backend_name()
    }

    /// Load both records and reconcile them
    ///
    /// A store that has never been written loads as empty generation 0.
    pub fn load(&self) -> Result<LoadedCorpus> {
        let documents: Option<Record<Document>> = self
            .read_record(DOCUMENTS_KEY)
            .map_err(|e| QuarryError::persistence("Failed to load documents", e))?;

        let embeddings: Option<Record<Embedding>> = match self.read_record(EMBEDDINGS_KEY) {
            Ok(record) => record,
            Err(e @ QuarryError::Corruption(_)) => {
                warn!("Discarding unreadable embeddings record: {}", e);
                None
            }
            Err(e) => return Err(QuarryError::persistence("Failed to load embeddings", e)),
        };

        let generation = documents.as_ref().map(|r| r.generation).unwrap_or(0);
        if let Some(record) = &embeddings {
            if record.generation != generation {
                warn!(
                    "Embeddings record generation {} differs from documents generation {}",
                    record.generation, generation
                );
            }
        }

        let documents = documents.map(|r| r.items).unwrap_or_default();
        let embeddings = embeddings.map(|r| r.items).unwrap_or_default();
        let corpus = reconcile(documents, embeddings, generation);

        debug!(
            "Loaded generation {}: {} documents, {} embeddings ({} dropped)",
            corpus.generation,
            corpus.documents.len(),
            corpus.embeddings.len(),
            corpus.dropped_embeddings
        );

        Ok(corpus)
    }

    /// Replace both records with the given contents
    pub fn persist(
        &self,
        documents: &[Document],
        embeddings: &[Embedding],
        generation: u64,
    ) -> Result<()> {
        let written_at = Utc::now();
        let embeddings_bytes = self
            .encode_record(embeddings, generation, written_at)
            .map_err(|e| QuarryError::persistence("Failed to encode embeddings", e))?;
        let documents_bytes = self
            .encode_record(documents, generation, written_at)
            .map_err(|e| QuarryError::persistence("Failed to encode documents", e))?;

        self.objects
            .write_many(&[
                (EMBEDDINGS_KEY, embeddings_bytes),
                (DOCUMENTS_KEY, documents_bytes),
            ])
            .map_err(|e| QuarryError::persistence("Failed to write corpus", e))?;

        info!(
            "Persisted generation {}: {} documents, {} embeddings",
            generation,
            documents.len(),
            embeddings.len()
        );
        Ok(())
    }

    /// Run `load` on the blocking pool
    pub async fn load_async(&self) -> Result<LoadedCorpus> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| anyhow::anyhow!("Store load task failed: {}", e))?
    }

    /// Run `persist` on the blocking pool
    pub async fn persist_async(
        &self,
        documents: Vec<Document>,
        embeddings: Vec<Embedding>,
        generation: u64,
    ) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.persist(&documents, &embeddings, generation))
            .await
            .map_err(|e| anyhow::anyhow!("Store persist task failed: {}", e))?
    }

    fn encode_record<T: Serialize>(
        &self,
        items: &[T],
        generation: u64,
        written_at: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct RecordRef<'a, T> {
            format: &'a str,
            schema_version: u32,
            generation: u64,
            written_at: DateTime<Utc>,
            items: &'a [T],
        }

        let json = serde_json::to_vec(&RecordRef {
            format: RECORD_FORMAT,
            schema_version: RECORD_SCHEMA_VERSION,
            generation,
            written_at,
            items,
        })
        .map_err(|e| QuarryError::Json {
            source: e,
            context: "Failed to serialize record".to_string(),
        })?;

        if json.len() >= self.compression_threshold {
            zstd::encode_all(&json[..], ZSTD_LEVEL).map_err(|e| QuarryError::Io {
                source: e,
                context: "Failed to compress record".to_string(),
            })
        } else {
            Ok(json)
        }
    }

    fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Record<T>>> {
        let Some(bytes) = self.objects.read_blob(key)? else {
            return Ok(None);
        };
        decode_record(key, &bytes).map(Some)
    }
}

/// Decode a stored record, decompressing when it carries the zstd magic
fn decode_record<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<Record<T>> {
    let decompressed;
    let json = if bytes.starts_with(&ZSTD_MAGIC) {
        decompressed = zstd::decode_all(bytes)
            .map_err(|e| QuarryError::Corruption(format!("{}: bad compression: {}", key, e)))?;
        &decompressed[..]
    } else {
        bytes
    };

    let record: Record<T> = serde_json::from_slice(json)
        .map_err(|e| QuarryError::Corruption(format!("{}: undecodable record: {}", key, e)))?;

    if record.format != RECORD_FORMAT {
        return Err(QuarryError::Corruption(format!(
            "{}: unexpected record format '{}'",
            key, record.format
        )));
    }
    if record.schema_version > RECORD_SCHEMA_VERSION {
        return Err(QuarryError::Corruption(format!(
            "{}: unsupported schema version {}",
            key, record.schema_version
        )));
    }

    Ok(record)
}

/// Keep only embeddings that belong to a current document
///
/// Drops orphans, stale vectors (hash differs from the document's current
/// body), duplicates and vectors whose dimension differs from the first
/// valid one. Documents are always kept; without a vector they serve
/// keyword queries only.
fn reconcile(
    documents: Vec<Document>,
    embeddings: Vec<Embedding>,
    generation: u64,
) -> LoadedCorpus {
    // Last record wins if an id appears twice
    let mut positions: AHashMap<String, usize> = AHashMap::with_capacity(documents.len());
    let mut unique: Vec<Document> = Vec::with_capacity(documents.len());
    for doc in documents {
        match positions.get(&doc.id) {
            Some(&index) => {
                warn!("Duplicate document record for {}, keeping the later one", doc.id);
                unique[index] = doc;
            }
            None => {
                positions.insert(doc.id.clone(), unique.len());
                unique.push(doc);
            }
        }
    }

    let hashes: AHashMap<&str, String> = unique
        .iter()
        .map(|doc| (doc.id.as_str(), content_hash(&doc.body)))
        .collect();

    let mut dimension = None;
    let mut seen: AHashSet<String> = AHashSet::new();
    let mut kept = Vec::with_capacity(embeddings.len());
    let mut dropped = 0;

    for embedding in embeddings {
        let reason = match hashes.get(embedding.document_id.as_str()) {
            None => Some("no such document".to_string()),
            Some(hash) if *hash != embedding.content_hash => {
                Some("content hash does not match document body".to_string())
            }
            Some(_) if seen.contains(&embedding.document_id) => {
                Some("duplicate embedding".to_string())
            }
            Some(_) if embedding.vector.is_empty() => Some("empty vector".to_string()),
            Some(_) => match dimension {
                Some(d) if d != embedding.dimension() => Some(format!(
                    "dimension {} differs from store dimension {}",
                    embedding.dimension(),
                    d
                )),
                _ => None,
            },
        };

        match reason {
            Some(reason) => {
                warn!(
                    "Dropping embedding for {}: {}",
                    embedding.document_id, reason
                );
                dropped += 1;
            }
            None => {
                dimension.get_or_insert(embedding.dimension());
                seen.insert(embedding.document_id.clone());
                kept.push(embedding);
            }
        }
    }

    LoadedCorpus {
        documents: unique,
        embeddings: kept,
        generation,
        dimension,
        dropped_embeddings: dropped,
    }
}
