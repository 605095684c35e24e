use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use reqwest::StatusCode;

use crate::{
    config::{default_base_url, parse_llm_provider_model, LlmConfig, RetryConfig},
    error::{RagError, Result},
    retry::RetryPolicy,
};

/// Chat-completion client for OpenAI-compatible endpoints.
///
/// Each completion runs under the shared [`RetryPolicy`]; failures are
/// classified into rate limits, authentication failures (never retried) and
/// transient or permanent service errors.
#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    model: String,
    retry: RetryPolicy,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig, retry: &RetryConfig) -> Result<Self> {
        let (provider, model) = parse_llm_provider_model(&config.model);
        let provider = provider.to_lowercase();

        if !matches!(provider.as_str(), "ollama" | "local" | "lmstudio") && config.api_key.is_none()
        {
            return Err(RagError::LlmUnavailable(format!(
                "API key required for provider '{provider}'"
            )));
        }

        let model = if provider == "local" {
            config.model.clone()
        } else {
            model.to_string()
        };
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(&provider).to_string());
        let timeout = Duration::from_secs(config.timeout_secs);

        let openai_config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RagError::llm(format!("Failed to create LLM HTTP client: {error}")))?;

        // async-openai retries 429 and 5xx on its own; bound that by one attempt's timeout.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(timeout),
            ..Default::default()
        };

        Ok(Self {
            client: Client::with_config(openai_config)
                .with_http_client(http_client)
                .with_backoff(backoff),
            model,
            retry: RetryPolicy::new(retry.max_attempts, timeout)
                .with_base_delay(Duration::from_millis(retry.base_delay_ms)),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(RagError::Validation("Prompt cannot be empty".to_string()));
        }

        let request = self.request(prompt, system_prompt)?;
        self.retry
            .run("llm completion", || {
                let request = request.clone();
                async move {
                    let response = self
                        .client
                        .chat()
                        .create(request)
                        .await
                        .map_err(classify)?;
                    first_choice(response)
                }
            })
            .await
    }

    fn request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<CreateChatCompletionRequest> {
        let invalid = |error: OpenAIError| RagError::Validation(format!("Invalid LLM request: {error}"));
        let mut messages = Vec::with_capacity(2);

        if let Some(system_prompt) = system_prompt.filter(|value| !value.trim().is_empty()) {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(invalid)?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(invalid)?
                .into(),
        );

        CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(messages)
            .temperature(0.0)
            .build()
            .map_err(invalid)
    }
}

fn first_choice(response: CreateChatCompletionResponse) -> Result<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(RagError::llm("LLM response contained no content"));
    }
    Ok(content)
}

/// Maps a client failure onto the error taxonomy. Only network failures,
/// 5xx, untyped API errors and undecodable bodies are retryable.
fn classify(error: OpenAIError) -> RagError {
    match error {
        OpenAIError::Reqwest(error) => match error.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => RagError::LlmRateLimit { retry_after: None },
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                RagError::LlmUnavailable(format!("LLM authentication failed: {error}"))
            }
            Some(status) if !status.is_server_error() => {
                RagError::llm(format!("LLM request failed: {error}"))
            }
            _ => RagError::llm_retryable(format!("LLM request failed: {error}")),
        },
        OpenAIError::ApiError(api_error) => {
            let (error_type, code) = (
                api_error.r#type.as_deref().unwrap_or_default().to_lowercase(),
                api_error.code.as_deref().unwrap_or_default().to_lowercase(),
            );
            if is_rate_limit(&api_error, &error_type, &code) {
                RagError::LlmRateLimit { retry_after: None }
            } else if is_auth_failure(&api_error, &error_type, &code) {
                RagError::LlmUnavailable(format!("LLM authentication failed: {api_error}"))
            } else if error_type.is_empty() && code.is_empty() {
                RagError::llm_retryable(format!("LLM API error: {api_error}"))
            } else {
                RagError::llm(format!("LLM API error: {api_error}"))
            }
        }
        OpenAIError::JSONDeserialize(error) => {
            RagError::llm_retryable(format!("Malformed LLM response: {error}"))
        }
        OpenAIError::InvalidArgument(message) => RagError::Validation(message),
        other => RagError::llm(other.to_string()),
    }
}

fn is_rate_limit(api_error: &ApiError, error_type: &str, code: &str) -> bool {
    let message = api_error.message.to_lowercase();
    message.contains("rate limit")
        || message.contains("too many requests")
        || error_type.contains("rate_limit")
        || code.contains("rate_limit")
        || code == "insufficient_quota"
}

fn is_auth_failure(api_error: &ApiError, error_type: &str, code: &str) -> bool {
    let message = api_error.message.to_lowercase();
    message.contains("unauthorized")
        || message.contains("invalid api key")
        || code.contains("invalid_api_key")
        || error_type.contains("authentication")
}
