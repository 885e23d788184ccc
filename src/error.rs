use crate::embedding::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the quarry engine
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Malformed search or mutation request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Embedding provider failure (recoverable)
    #[error("Embedding provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Store I/O failure; the previous state stays authoritative
    #[error("Persistence error: {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: Box<QuarryError>,
    },

    /// Inconsistent stored data (dimension mismatch, orphaned record, bad encoding)
    #[error("Corrupt record: {0}")]
    Corruption(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// The background refresher is gone
    #[error("Refresher unavailable: {0}")]
    RefresherClosed(String),

    /// A snapshot refresh failed; the previous snapshot keeps serving
    #[error("Snapshot refresh failed: {0}")]
    Refresh(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuarryError {
    /// Wrap an error as a persistence failure with context
    pub fn persistence(context: impl Into<String>, source: QuarryError) -> Self {
        Self::Persistence {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;
