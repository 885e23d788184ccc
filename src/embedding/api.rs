//! OpenAI-compatible HTTP embedding provider

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{parse_duration, EmbeddingConfig};
use crate::error::{QuarryError, Result};

use super::{EmbeddingProvider, ProviderError};

/// Embedding provider speaking the OpenAI `/embeddings` protocol
pub struct ApiEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl ApiEmbeddingProvider {
    /// Create a provider from configuration, reading the API key from the configured env var
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());

        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; sending embedding requests without authorization",
                config.api_key_env
            );
        }

        Self::new(
            &config.base_url,
            &config.model,
            api_key,
            config.dimension,
            parse_duration(&config.request_timeout)?,
        )
    }

    /// Create a provider with explicit parameters
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuarryError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            dimension,
            timeout,
        })
    }

    fn map_transport_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else if error.is_connect() {
            ProviderError::Unavailable(format!("Connection failed: {}", error))
        } else {
            ProviderError::Unavailable(format!("Request failed: {}", error))
        }
    }
}

/// Map a non-success HTTP status to the provider error taxonomy
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|response| response.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ProviderError::Unavailable(format!("API error ({}): {}", status, message))
    } else {
        ProviderError::InvalidInput(format!("API error ({}): {}", status, message))
    }
}

#[async_trait]
impl EmbeddingProvider for ApiEmbeddingProvider {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidInput("Empty text".to_string()));
        }

        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            encoding_format: "float",
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(status, &body));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            ProviderError::Unavailable(format!("Failed to parse response: {}", e))
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| ProviderError::Unavailable("No embedding returned".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited
        );
    }

    #[test]
    fn test_classify_server_error_uses_api_message() {
        let body = r#"{"error":{"message":"overloaded","type":"server_error"}}"#;
        match classify_status(StatusCode::SERVICE_UNAVAILABLE, body) {
            ProviderError::Unavailable(message) => assert!(message.contains("overloaded")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_client_error_is_invalid_input() {
        let error = classify_status(StatusCode::BAD_REQUEST, "input too long");
        assert!(matches!(error, ProviderError::InvalidInput(_)));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = ApiEmbeddingProvider::new(
            "http://localhost:11434/v1/",
            "nomic-embed-text",
            None,
            768,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
        assert_eq!(provider.dimension(), 768);
        assert_eq!(provider.model_name(), "nomic-embed-text");
    }

    #[tokio::test]
    async fn test_empty_text_rejected_before_request() {
        let provider =
            ApiEmbeddingProvider::new("http://127.0.0.1:9", "m", None, 4, Duration::from_secs(1))
                .unwrap();
        let result = provider.embed("   ").await;
        assert!(matches!(result, Err(ProviderError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Port 9 (discard) is closed on test machines
        let provider =
            ApiEmbeddingProvider::new("http://127.0.0.1:9", "m", None, 4, Duration::from_secs(2))
                .unwrap();
        let result = provider.embed("hello").await;
        assert!(matches!(
            result,
            Err(ProviderError::Unavailable(_)) | Err(ProviderError::Timeout(_))
        ));
    }
}
