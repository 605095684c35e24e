use async_trait::async_trait;

use crate::error::Result;

/// A named embedding capability.
///
/// Implementations make exactly one upstream attempt per call and classify
/// failures through [`crate::error::RagError::is_retryable`]; batching,
/// caching and retries belong to [`super::EmbeddingGateway`].
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Stable identifier, used in cache keys.
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embeds `texts`, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
