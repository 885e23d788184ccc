//! Indexed documents and their embeddings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_category() -> String {
    "text".to_string()
}

/// A unit of indexed content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-assigned id, stable across re-ingestion of the same source
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub summary: String,

    /// Searchable body text
    pub body: String,

    /// Broad content category ("text", "image", ...)
    #[serde(default = "default_category")]
    pub content_category: String,

    /// Original format hint ("pdf", "html", "png", ...)
    #[serde(default)]
    pub file_kind: String,

    /// Opaque reference to where the content came from
    #[serde(default)]
    pub source_locator: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,

    /// Set by the index writer, never by the caller
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub size_bytes: u64,

    #[serde(default)]
    pub key_phrases: Vec<String>,

    /// Passed through unmodified
    #[serde(default)]
    pub extra_metadata: Value,
}

impl Document {
    /// Create a text document with the given id and body
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let now = Utc::now();
        Self {
            id: id.into(),
            title: String::new(),
            summary: String::new(),
            size_bytes: body.len() as u64,
            body,
            content_category: default_category(),
            file_kind: String::new(),
            source_locator: String::new(),
            created_at: now,
            modified_at: now,
            indexed_at: None,
            key_phrases: Vec::new(),
            extra_metadata: Value::Null,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.content_category = category.into();
        self
    }

    pub fn with_file_kind(mut self, kind: impl Into<String>) -> Self {
        self.file_kind = kind.into();
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn with_key_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_phrases = phrases.into_iter().map(Into::into).collect();
        self
    }

    /// Text used for keyword matching: title, summary and body
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(
            self.title.len() + self.summary.len() + self.body.len() + 2,
        );
        for part in [&self.title, &self.summary, &self.body] {
            if part.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(part);
        }
        text
    }

    /// Check the fields the engine relies on
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".to_string());
        }
        if self.body.trim().is_empty() {
            return Err("body text must not be empty".to_string());
        }
        Ok(())
    }

    /// Drop repeated key phrases, keeping first occurrence order
    pub(crate) fn dedup_key_phrases(&mut self) {
        let mut seen = ahash::AHashSet::new();
        self.key_phrases.retain(|phrase| seen.insert(phrase.clone()));
    }
}

/// Vector embedding for exactly one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub document_id: String,
    /// Hash of the normalized body text the vector was computed from
    pub content_hash: String,
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}
