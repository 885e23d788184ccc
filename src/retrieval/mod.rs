//! Retrieval: keyword, vector, hybrid and semantic search over a snapshot
//!
//! Scoring is deterministic for a given snapshot and query embedding.
//! Filters are applied before any score is computed.

mod executor;
mod hybrid;
mod keyword;
mod vector;

pub use executor::SearchExecutor;
pub use hybrid::ScoringConfig;
pub use keyword::{keyword_score, term_set, tokenize};
pub use vector::cosine_similarity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scoring strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchMode {
    Keyword,
    Vector,
    #[default]
    Hybrid,
    Semantic,
}

impl SearchMode {
    /// Whether this mode needs a query embedding
    pub fn uses_vectors(self) -> bool {
        !matches!(self, SearchMode::Keyword)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchMode::Keyword => "Keyword",
            SearchMode::Vector => "Vector",
            SearchMode::Hybrid => "Hybrid",
            SearchMode::Semantic => "Semantic",
        };
        f.write_str(name)
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyword" => Ok(SearchMode::Keyword),
            "vector" => Ok(SearchMode::Vector),
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" => Ok(SearchMode::Semantic),
            other => Err(format!(
                "Unknown search mode '{}' (expected keyword, vector, hybrid or semantic)",
                other
            )),
        }
    }
}

/// Structured filters applied before scoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Empty matches every kind
    #[serde(default)]
    pub file_kinds: Vec<String>,
    #[serde(default)]
    pub modified_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_before: Option<DateTime<Utc>>,
}

/// Search query with optional filters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,

    #[serde(default)]
    pub mode: SearchMode,

    /// Empty matches every category
    #[serde(default)]
    pub content_categories: Vec<String>,

    /// 0 selects the configured default
    #[serde(default)]
    pub max_results: usize,

    #[serde(default)]
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            query: query.into(),
            mode,
            content_categories: Vec::new(),
            max_results: 0,
            filters: SearchFilters::default(),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_file_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.file_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn modified_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.filters.modified_after = after;
        self.filters.modified_before = before;
        self
    }
}

/// One ranked hit with its displayable fields
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub score: f32,
    /// 0 when not computed
    pub keyword_score: f32,
    /// 0 when not computed
    pub vector_score: f32,
    pub title: String,
    pub summary: String,
    pub content_category: String,
    pub file_kind: String,
    pub source_locator: String,
    pub modified_at: DateTime<Utc>,
    pub key_phrases: Vec<String>,
}

/// Ranked results of a search
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Qualifying documents before truncation
    pub total_results: usize,
    pub execution_time_ms: u64,
    pub mode_used: SearchMode,
    /// The requested mode fell back to keyword scoring
    pub degraded: bool,
    pub generation: u64,
}
