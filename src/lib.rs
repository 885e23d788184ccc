//! Quarry - Hybrid Search & Embedding Index Engine
//!
//! Answers free-text queries against a corpus of ingested documents using
//! keyword matching, embedding similarity, or a weighted hybrid of both.
//! The corpus and its vectors are persisted to a pluggable object store and
//! served from an immutable in-memory snapshot that is refreshed in the
//! background.

pub mod cli;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod retrieval;
pub mod storage;

pub use document::{Document, Embedding};
pub use engine::{Engine, EngineStatus};
pub use error::{QuarryError, Result};
pub use retrieval::{SearchMode, SearchRequest, SearchResponse, SearchResult};
