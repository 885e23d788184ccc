//! Configuration management for quarry
//!
//! Loaded from TOML, overridden from `QUARRY_SECTION__KEY` environment
//! variables, then validated as a whole before any component is built.

use crate::error::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// "fs" or "sqlite"
    pub backend: String,
    /// Records at least this large are zstd-compressed
    pub compression_threshold: usize,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "online" (HTTP API) or "offline" (local model)
    pub mode: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub dimension: usize,
    /// Simultaneous in-flight provider calls
    pub max_concurrent: usize,
    pub request_timeout: String,
    pub max_attempts: u32,
    pub backoff_base: String,
    pub backoff_max: String,
}

/// Scoring and query-path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub keyword_weight: f32,
    pub vector_weight: f32,
    /// Added to hybrid scores of documents matched by both signals
    pub agreement_bonus: f32,
    /// Multiplier applied to vector scores in semantic mode
    pub semantic_boost: f32,
    pub default_max_results: usize,
    /// Timeout for the query-time embedding call
    pub query_timeout: String,
}

/// Snapshot refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub interval: String,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QuarryError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| QuarryError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(mode) = overrides.embedding_mode {
            self.embedding.mode = mode;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(interval) = overrides.refresh_interval {
            self.refresh.interval = interval;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: QUARRY_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("QUARRY_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__BACKEND" => self.storage.backend = value.to_string(),
            "EMBEDDING__MODE" => self.embedding.mode = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BASE_URL" => self.embedding.base_url = value.to_string(),
            "EMBEDDING__MAX_CONCURRENT" => {
                self.embedding.max_concurrent =
                    value.parse().map_err(|_| QuarryError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "REFRESH__INTERVAL" => self.refresh.interval = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("quarry").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.quarry"),
                backend: "fs".to_string(),
                compression_threshold: 4096,
            },
            embedding: EmbeddingConfig {
                mode: "online".to_string(),
                model: "text-embedding-3-small".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                dimension: 1536,
                max_concurrent: 5,
                request_timeout: "30s".to_string(),
                max_attempts: 3,
                backoff_base: "200ms".to_string(),
                backoff_max: "5s".to_string(),
            },
            search: SearchConfig {
                keyword_weight: 0.6,
                vector_weight: 0.4,
                agreement_bonus: 0.1,
                semantic_boost: 1.2,
                default_max_results: 10,
                query_timeout: "5s".to_string(),
            },
            refresh: RefreshConfig {
                interval: "5m".to_string(),
            },
            profiles: HashMap::new(),
        }
    }
}

/// Parse a duration string such as "250ms", "5s", "10m" or "1h"
///
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let invalid = || QuarryError::InvalidConfigValue {
        path: "duration".to_string(),
        message: format!("Invalid duration: '{}'", value),
    };

    // "ms" before "s" because "ms" ends with "s"
    let (number, unit_ms) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (value, 1_000)
    };

    let number: u64 = number.trim().parse().map_err(|_| invalid())?;
    Ok(Duration::from_millis(number.saturating_mul(unit_ms)))
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~/.quarry")), home.join(".quarry"));
        assert_eq!(
            expand_tilde(Path::new("/tmp/quarry")),
            PathBuf::from("/tmp/quarry")
        );
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.search.keyword_weight, 0.6);
        assert_eq!(parsed.embedding.max_concurrent, 5);
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "local".to_string(),
            ProfileOverrides {
                embedding_mode: Some("offline".to_string()),
                embedding_model: Some("all-MiniLM-L6-v2".to_string()),
                refresh_interval: None,
            },
        );

        config.apply_profile("local").unwrap();
        assert_eq!(config.embedding.mode, "offline");
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
        assert_eq!(config.refresh.interval, "5m");

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/quarry/config.toml"));
        assert!(matches!(result, Err(QuarryError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.refresh.interval = "30s".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.refresh.interval, "30s");
    }
}
