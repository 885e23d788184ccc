use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{QuarryError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_refresh(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QuarryError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        let backend = &config.storage.backend;
        if backend != "fs" && backend != "sqlite" {
            errors.push(ValidationError::new(
                "storage.backend",
                format!("Backend must be 'fs' or 'sqlite', got '{}'", backend),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if embedding.mode != "offline" && embedding.mode != "online" {
            errors.push(ValidationError::new(
                "embedding.mode",
                format!("Mode must be 'offline' or 'online', got '{}'", embedding.mode),
            ));
        }

        if embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if embedding.mode == "online" && embedding.base_url.is_empty() {
            errors.push(ValidationError::new(
                "embedding.base_url",
                "Base URL is required in online mode",
            ));
        }

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if embedding.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent",
                "Concurrency ceiling must be greater than 0",
            ));
        }

        if embedding.max_attempts == 0 {
            errors.push(ValidationError::new(
                "embedding.max_attempts",
                "At least one attempt is required",
            ));
        }

        for (path, value) in [
            ("embedding.request_timeout", &embedding.request_timeout),
            ("embedding.backoff_base", &embedding.backoff_base),
            ("embedding.backoff_max", &embedding.backoff_max),
        ] {
            Self::check_duration(path, value, errors);
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        for (path, weight) in [
            ("search.keyword_weight", search.keyword_weight),
            ("search.vector_weight", search.vector_weight),
            ("search.agreement_bonus", search.agreement_bonus),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(ValidationError::new(
                    path,
                    format!("Must be between 0.0 and 1.0, got {}", weight),
                ));
            }
        }

        if search.semantic_boost <= 0.0 {
            errors.push(ValidationError::new(
                "search.semantic_boost",
                format!("Boost must be positive, got {}", search.semantic_boost),
            ));
        }

        if search.default_max_results == 0 {
            errors.push(ValidationError::new(
                "search.default_max_results",
                "Default result count must be greater than 0",
            ));
        }

        Self::check_duration("search.query_timeout", &search.query_timeout, errors);
    }

    fn validate_refresh(config: &Config, errors: &mut Vec<ValidationError>) {
        match parse_duration(&config.refresh.interval) {
            Ok(interval) if interval.is_zero() => errors.push(ValidationError::new(
                "refresh.interval",
                "Refresh interval must be greater than 0",
            )),
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::new(
                "refresh.interval",
                format!("Invalid duration format: {}", config.refresh.interval),
            )),
        }
    }

    fn check_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        if parse_duration(value).is_err() {
            errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_empty_data_dir() {
        let mut config = Config::default();
        config.storage.data_dir = PathBuf::new();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_mode() {
        let mut config = Config::default();
        config.embedding.mode = "invalid".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.storage.backend = "postgres".to_string();
        config.embedding.max_concurrent = 0;
        config.search.keyword_weight = 1.5;
        config.refresh.interval = "soon".to_string();

        match ConfigValidator::validate(&config) {
            Err(QuarryError::ConfigValidation { errors }) => {
                let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec![
                        "storage.backend",
                        "embedding.max_concurrent",
                        "search.keyword_weight",
                        "refresh.interval",
                    ]
                );
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_refresh_interval() {
        let mut config = Config::default();
        config.refresh.interval = "0s".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
