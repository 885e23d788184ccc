//! Filesystem object store
//!
//! One file per key under `objects/`, replaced atomically

use super::{validate_key, ObjectStore};
use crate::error::{QuarryError, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

/// Directory-backed object store
pub struct FsObjectStore {
    base_path: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `base_path`, creating `objects/` if needed
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let objects_dir = base_path.join("objects");
        fs::create_dir_all(&objects_dir).map_err(|e| QuarryError::Io {
            source: e,
            context: format!(
                "Failed to create objects directory: {}",
                objects_dir.display()
            ),
        })?;

        Ok(Self { base_path })
    }

    /// Get the path for an object given its key
    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join("objects").join(format!("{}.blob", key))
    }

    /// Get temporary path for atomic writes
    fn temp_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join("objects")
            .join(format!("{}.blob.tmp", key))
    }
}

impl ObjectStore for FsObjectStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let path = self.object_path(key);

        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QuarryError::Io {
                source: e,
                context: format!("Failed to read object: {}", path.display()),
            }),
        }
    }

    fn write_blob(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;

        // Write to temporary file first (atomic write)
        let temp_path = self.temp_path(key);
        let mut file = fs::File::create(&temp_path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to create temp object file: {}", temp_path.display()),
        })?;

        file.write_all(data).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to write object data: {}", temp_path.display()),
        })?;

        file.sync_all().map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to sync object file: {}", temp_path.display()),
        })?;
        drop(file);

        let object_path = self.object_path(key);
        fs::rename(&temp_path, &object_path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!(
                "Failed to rename temp object to final location: {} -> {}",
                temp_path.display(),
                object_path.display()
            ),
        })?;

        tracing::debug!("Wrote object {} ({} bytes)", key, data.len());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "fs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp_dir.path().to_path_buf()).unwrap();

        store.write_blob("documents", b"Hello, World!").unwrap();
        let data = store.read_blob("documents").unwrap();
        assert_eq!(data.as_deref(), Some(&b"Hello, World!"[..]));
    }

    #[test]
    fn test_missing_key_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(store.read_blob("embeddings").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_replaces_and_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp_dir.path().to_path_buf()).unwrap();

        store.write_blob("documents", b"first").unwrap();
        store.write_blob("documents", b"second").unwrap();

        assert_eq!(
            store.read_blob("documents").unwrap().as_deref(),
            Some(&b"second"[..])
        );
        assert!(!store.temp_path("documents").exists());
    }

    #[test]
    fn test_write_many_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp_dir.path().to_path_buf()).unwrap();

        store
            .write_many(&[("embeddings", b"e".to_vec()), ("documents", b"d".to_vec())])
            .unwrap();

        assert!(store.object_path("embeddings").exists());
        assert!(store.object_path("documents").exists());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(store.write_blob("../outside", b"x").is_err());
        assert!(store.read_blob("nested/key").is_err());
    }
}
