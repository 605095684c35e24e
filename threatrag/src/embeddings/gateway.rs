use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{EmbeddingBackend, EmbeddingCache, EmbeddingRegistry};
use crate::config::Config;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// Batched, cached, retrying front for an [`EmbeddingBackend`].
///
/// Output has the same length and order as the input. Identical texts within
/// one call are embedded once. A failing batch is retried as a whole and
/// never partially returned.
#[derive(Clone)]
pub struct EmbeddingGateway {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Option<EmbeddingCache>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl EmbeddingGateway {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            cache: None,
            batch_size: 64,
            retry,
        }
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn from_config(config: &Config, registry: &EmbeddingRegistry) -> Result<Self> {
        let backend = registry.resolve(&config.embeddings)?;
        let retry = RetryPolicy::new(
            config.retry.max_attempts,
            Duration::from_secs(config.embeddings.timeout_secs),
        )
        .with_base_delay(Duration::from_millis(config.retry.base_delay_ms));
        let cache = EmbeddingCache::new(
            config.embeddings.cache_size,
            Duration::from_secs(config.embeddings.cache_ttl_secs),
        );

        Ok(Self::new(backend, retry)
            .with_cache(cache)
            .with_batch_size(config.embeddings.batch_size))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn dimensions(&self) -> usize {
        self.backend.dimensions()
    }

    pub fn cache(&self) -> Option<&EmbeddingCache> {
        self.cache.as_ref()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.backend.name();
        let mut resolved: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<(String, Vec<usize>)> = Vec::new();
        let mut miss_slot: HashMap<&str, usize> = HashMap::new();

        for (i, text) in texts.iter().enumerate() {
            if let Some(cache) = &self.cache {
                if let Some(vector) = cache.get(&EmbeddingCache::key(model, text)) {
                    resolved[i] = Some(vector.as_ref().clone());
                    continue;
                }
            }
            match miss_slot.get(text.as_str()) {
                Some(&slot) => misses[slot].1.push(i),
                None => {
                    miss_slot.insert(text.as_str(), misses.len());
                    misses.push((text.clone(), vec![i]));
                }
            }
        }

        tracing::debug!(
            backend = model,
            requested = texts.len(),
            cache_hits = texts.len() - misses.iter().map(|(_, s)| s.len()).sum::<usize>(),
            to_embed = misses.len(),
            "Embedding texts"
        );

        for batch in misses.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|(text, _)| text.clone()).collect();
            let vectors = self.embed_batch_with_retry(&inputs).await?;

            for ((text, slots), vector) in batch.iter().zip(vectors) {
                if let Some(cache) = &self.cache {
                    cache.put(EmbeddingCache::key(model, text), vector.clone());
                }
                for &slot in slots {
                    resolved[slot] = Some(vector.clone());
                }
            }
        }

        resolved
            .into_iter()
            .map(|v| v.ok_or_else(|| RagError::Internal("embedding slot left unfilled".into())))
            .collect()
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding generated"))
    }

    async fn embed_batch_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let dimensions = self.backend.dimensions();

        self.retry
            .run("embedding batch", || async move {
                let vectors = self.backend.embed_batch(inputs).await?;
                check_batch(&vectors, inputs.len(), dimensions)?;
                Ok(vectors)
            })
            .await
            .map_err(|error| match error {
                RagError::EmbeddingService { .. } => error,
                other => RagError::EmbeddingService {
                    retryable: other.is_retryable(),
                    message: other.to_string(),
                },
            })
    }
}

fn check_batch(vectors: &[Vec<f32>], expected: usize, dimensions: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(RagError::embedding_retryable(format!(
            "Malformed response: expected {expected} embeddings, got {}",
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(RagError::embedding_retryable(format!(
            "Malformed response: expected dimension {dimensions}, got {}",
            bad.len()
        )));
    }
    Ok(())
}
