//! SQLite object store with migrations
//!
//! Multi-key writes commit in a single transaction

use super::{validate_key, ObjectStore};
use crate::error::{QuarryError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// SQLite-backed object store
pub struct SqliteObjectStore {
    pool: DbPool,
}

impl SqliteObjectStore {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = FULL;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| QuarryError::Config(format!("Failed to create connection pool: {}", e)))?;

        let store = Self { pool };
        store.migrate()?;

        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| QuarryError::Config(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Number of stored objects and their total size in bytes
    pub fn stats(&self) -> Result<(usize, u64)> {
        let conn = self.get_conn()?;
        let (count, size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(data)), 0) FROM objects",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count as usize, size as u64))
    }
}

const UPSERT_OBJECT: &str = "INSERT INTO objects (key, data, updated_at)
     VALUES (?1, ?2, datetime('now'))
     ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at";

impl ObjectStore for SqliteObjectStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let conn = self.get_conn()?;
        let data = conn
            .query_row(
                "SELECT data FROM objects WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn write_blob(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        let conn = self.get_conn()?;
        conn.execute(UPSERT_OBJECT, params![key, data])?;
        Ok(())
    }

    fn write_many(&self, entries: &[(&str, Vec<u8>)]) -> Result<()> {
        for (key, _) in entries {
            validate_key(key)?;
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for (key, data) in entries {
            tx.execute(UPSERT_OBJECT, params![key, data])?;
        }
        tx.commit()?;

        tracing::debug!("Committed {} objects", entries.len());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: keyed objects
    r#"
    CREATE TABLE objects (
        key TEXT PRIMARY KEY,
        data BLOB NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
];
