use async_trait::async_trait;

use crate::config::{parse_llm_provider_model, LlmConfig, RetryConfig};
use crate::error::{RagError, Result};
use crate::llm::api::LlmApiClient;

/// The generation collaborator: a prompt goes in, answer text comes out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAI,
    OpenRouter,
    Ollama,
    LmStudio,
    OpenAICompatible { base_url: String },
    Unavailable { reason: String },
}

/// [`CompletionService`] backed by the configured OpenAI-compatible model,
/// or an unavailable stub when none is configured.
#[derive(Clone)]
pub struct LlmProvider {
    backend: LlmBackend,
    client: Option<LlmApiClient>,
    system_prompt: Option<String>,
}

impl LlmProvider {
    pub fn new(config: Option<&LlmConfig>, retry: &RetryConfig) -> Self {
        let Some(config) = config else {
            return Self::unavailable("No LLM configuration provided");
        };

        let (provider, _model) = parse_llm_provider_model(&config.model);

        let backend = match provider.to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAI,
            "openrouter" => LlmBackend::OpenRouter,
            "ollama" => LlmBackend::Ollama,
            "lmstudio" => LlmBackend::LmStudio,
            _ => match &config.base_url {
                Some(base_url) => LlmBackend::OpenAICompatible {
                    base_url: base_url.clone(),
                },
                None => {
                    return Self::unavailable(&format!(
                        "Unknown provider in model: {}",
                        config.model
                    ))
                }
            },
        };

        match LlmApiClient::new(config, retry) {
            Ok(client) => Self {
                backend,
                client: Some(client),
                system_prompt: None,
            },
            Err(error) => {
                tracing::warn!(model = %config.model, error = %error, "LLM client unavailable");
                Self::unavailable(&error.to_string())
            }
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: LlmBackend::Unavailable {
                reason: reason.to_string(),
            },
            client: None,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    fn unavailable_reason(&self) -> String {
        match &self.backend {
            LlmBackend::Unavailable { reason } => reason.clone(),
            _ => "LLM client not initialised".to_string(),
        }
    }
}

#[async_trait]
impl CompletionService for LlmProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| RagError::LlmUnavailable(self.unavailable_reason()))?;
        client.complete(prompt, self.system_prompt.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            model: model.to_string(),
            api_key: None,
            base_url: base_url.map(str::to_string),
            timeout_secs: 5,
        }
    }

    fn provider(model: &str, base_url: Option<&str>) -> LlmProvider {
        LlmProvider::new(Some(&config(model, base_url)), &RetryConfig::default())
    }

    #[test]
    fn test_backend_resolution() {
        assert_eq!(provider("ollama/llama3", None).backend(), &LlmBackend::Ollama);
        assert_eq!(
            provider("mistral", Some("http://vllm:8000/v1")).backend(),
            &LlmBackend::OpenAICompatible {
                base_url: "http://vllm:8000/v1".to_string()
            }
        );
        assert!(!provider("mistral", None).is_available());
    }

    #[test]
    fn test_missing_api_key_makes_provider_unavailable() {
        assert!(!provider("openai/gpt-4o-mini", None).is_available());
    }

    #[tokio::test]
    async fn test_unavailable_provider_errors() {
        let err = LlmProvider::new(None, &RetryConfig::default())
            .complete("hi")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::LlmUnavailable(_)));
    }
}
