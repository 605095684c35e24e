use std::collections::BTreeMap;
use std::sync::Arc;

use super::api::{ApiConfig, EmbeddingApiClient};
use super::{EmbeddingBackend, HashingEmbedder};
use crate::config::{parse_provider_model, EmbeddingsConfig};
use crate::error::{RagError, Result};

/// Builds a backend for `(config, model name)`.
pub type BackendFactory =
    Box<dyn Fn(&EmbeddingsConfig, &str) -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync>;

/// Embedding backends keyed by the provider prefix of `EMBEDDING_MODEL`.
pub struct EmbeddingRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl EmbeddingRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, provider: &str, factory: F)
    where
        F: Fn(&EmbeddingsConfig, &str) -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync + 'static,
    {
        self.factories
            .insert(provider.to_lowercase(), Box::new(factory));
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn resolve(&self, config: &EmbeddingsConfig) -> Result<Arc<dyn EmbeddingBackend>> {
        let (provider, model) = parse_provider_model(&config.model);
        let factory = self
            .factories
            .get(&provider.to_lowercase())
            .ok_or_else(|| {
                RagError::Config(format!(
                    "Unsupported embedding provider '{provider}' in '{}'",
                    config.model
                ))
            })?;

        let backend = factory(config, model)?;
        tracing::info!(
            provider,
            model,
            dimensions = backend.dimensions(),
            "Resolved embedding backend"
        );
        Ok(backend)
    }
}

impl Default for EmbeddingRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();

        registry.register("hash", |config, model| {
            Ok(Arc::new(HashingEmbedder::new(model, config.dimensions)) as Arc<dyn EmbeddingBackend>)
        });

        #[cfg(feature = "local-embeddings")]
        registry.register("local", |config, model| {
            let embedder =
                super::LocalEmbedder::new(model, config.dimensions, config.batch_size)?;
            Ok(Arc::new(embedder) as Arc<dyn EmbeddingBackend>)
        });

        for provider in ["openai", "openrouter", "ollama", "lmstudio"] {
            registry.register(provider, move |config, model| {
                let needs_key = matches!(provider, "openai" | "openrouter");
                if needs_key && config.api_key.is_none() {
                    return Err(RagError::Config(format!(
                        "EMBEDDING_API_KEY is required for provider '{provider}'"
                    )));
                }
                let api_config = ApiConfig::from_embeddings_config(config, provider, model);
                Ok(Arc::new(EmbeddingApiClient::new(api_config)?) as Arc<dyn EmbeddingBackend>)
            });
        }

        registry
    }
}
