//! Storage layer for quarry
//!
//! Keyed object stores (filesystem, SQLite, in-memory) and the corpus
//! store that persists documents and embeddings on top of them.

pub mod blob;
mod corpus;
pub mod database;
mod memory;

use crate::config::{expand_tilde, StorageConfig};
use crate::error::{QuarryError, Result};
use std::sync::Arc;

pub use blob::FsObjectStore;
pub use corpus::{CorpusStore, LoadedCorpus, Record, RECORD_FORMAT, RECORD_SCHEMA_VERSION};
pub use database::{DbPool, SqliteObjectStore};
pub use memory::MemoryObjectStore;

/// Logical key holding the documents record
pub const DOCUMENTS_KEY: &str = "documents";

/// Logical key holding the embeddings record
pub const EMBEDDINGS_KEY: &str = "embeddings";

/// Minimal keyed blob store
///
/// Calls are blocking; async callers run them on the blocking pool.
pub trait ObjectStore: Send + Sync {
    /// Read a blob, `None` if the key has never been written
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the blob stored under `key`
    fn write_blob(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Write several blobs in the given order
    ///
    /// Backends that can commit them together override this. The default
    /// stops at the first failure, leaving earlier entries written.
    fn write_many(&self, entries: &[(&str, Vec<u8>)]) -> Result<()> {
        for (key, data) in entries {
            self.write_blob(key, data)?;
        }
        Ok(())
    }

    /// Short backend name for status output
    fn backend_name(&self) -> &'static str;
}

/// Open the object store selected by `storage.backend`
pub fn open_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let data_dir = expand_tilde(&config.data_dir);

    match config.backend.as_str() {
        "fs" => Ok(Arc::new(FsObjectStore::new(data_dir)?)),
        "sqlite" => Ok(Arc::new(SqliteObjectStore::new(
            &data_dir.join("quarry.sqlite"),
        )?)),
        other => Err(QuarryError::Config(format!(
            "Unknown storage backend: {}",
            other
        ))),
    }
}

/// Keys must be usable as file names on every backend
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(QuarryError::InvalidRequest(format!(
            "Invalid object key: {:?}",
            key
        )))
    }
}
