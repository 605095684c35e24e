mod api;
mod cache;
mod gateway;
mod hash;
#[cfg(feature = "local-embeddings")]
mod local;
mod provider;
mod registry;

#[cfg(test)]
mod tests;

pub use api::{ApiConfig, EmbeddingApiClient};
pub use cache::EmbeddingCache;
pub use gateway::EmbeddingGateway;
pub use hash::HashingEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use provider::EmbeddingBackend;
pub use registry::{BackendFactory, EmbeddingRegistry};
