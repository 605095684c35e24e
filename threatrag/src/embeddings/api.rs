use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingBackend;
use crate::config::{default_base_url, EmbeddingsConfig};
use crate::error::{RagError, Result};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn from_embeddings_config(config: &EmbeddingsConfig, provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_lowercase(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url(provider).to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            dimensions: config.dimensions,
            timeout_secs: config.timeout_secs,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Client for OpenAI-compatible `/embeddings` endpoints (OpenAI, OpenRouter,
/// Ollama, LM Studio).
#[derive(Clone)]
pub struct EmbeddingApiClient {
    client: Client,
    config: ApiConfig,
    name: String,
}

impl EmbeddingApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::embedding(format!("Failed to create HTTP client: {e}")))?;

        let name = format!("{}/{}", config.provider, config.model);
        Ok(Self {
            client,
            config,
            name,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref api_key) = self.config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|e| RagError::embedding(format!("Invalid API key header: {e}")))?,
            );
        }

        Ok(headers)
    }

    /// One request, no retries. Failures are classified for the gateway's
    /// retry loop: rate limits, 5xx, transport errors and unparseable bodies
    /// are retryable; auth and other 4xx errors are not.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };
        let url = format!("{}/embeddings", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::embedding_retryable(format!("Request failed: {e}")))?;

        let status = response.status();

        if status.is_success() {
            let body: EmbeddingResponse = response.json().await.map_err(|e| {
                RagError::embedding_retryable(format!("Failed to parse response: {e}"))
            })?;
            let mut data = body.data;
            if data.iter().all(|d| d.index.is_some()) {
                data.sort_by_key(|d| d.index);
            }
            return Ok(data.into_iter().map(|d| d.embedding).collect());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok());
            return Err(RagError::EmbeddingRateLimit { retry_after });
        }

        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RagError::embedding(format!(
                "Authentication failed ({status}): {body}"
            )));
        }

        if status.is_server_error() {
            return Err(RagError::embedding_retryable(format!(
                "Server error {status}: {body}"
            )));
        }

        Err(RagError::embedding(format!("API error {status}: {body}")))
    }
}

#[async_trait]
impl EmbeddingBackend for EmbeddingApiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts).await
    }
}
