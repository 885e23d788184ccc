//! In-process object store

use super::{validate_key, ObjectStore};
use crate::error::{QuarryError, Result};
use ahash::AHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Object store held in memory, with switchable failures for testing
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<AHashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `write_blob`/`write_many` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, AHashMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| {
                QuarryError::Other(anyhow::anyhow!("Memory object store lock poisoned"))
            })
    }

    fn injected(operation: &str) -> QuarryError {
        QuarryError::Io {
            source: std::io::Error::other(format!("injected {} failure", operation)),
            context: "Memory object store".to_string(),
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected("read"));
        }
        Ok(self.lock()?.get(key).cloned())
    }

    fn write_blob(&self, key: &str, data: &[u8]) -> Result<()> {
        self.write_many(&[(key, data.to_vec())])
    }

    fn write_many(&self, entries: &[(&str, Vec<u8>)]) -> Result<()> {
        for (key, _) in entries {
            validate_key(key)?;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected("write"));
        }

        let mut objects = self.lock()?;
        for (key, data) in entries {
            objects.insert((*key).to_string(), data.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
