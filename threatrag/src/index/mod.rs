mod filter;
mod memory;

pub use filter::ChunkFilter;
pub use memory::InMemoryVectorIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::models::Chunk;

/// The persisted form of a chunk: its payload plus its vector.
///
/// Owned by the index once handed over; `chunk.embedding` is left empty and
/// the vector lives here.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn new(mut chunk: Chunk, vector: Vec<f32>) -> Self {
        chunk.embedding = None;
        Self { chunk, vector }
    }

    pub fn id(&self) -> &str {
        &self.chunk.id
    }

    pub fn source_id(&self) -> &str {
        &self.chunk.source_id
    }
}

#[derive(Debug, Clone)]
pub struct IndexHit {
    pub entry: Arc<IndexEntry>,
    pub score: f64,
}

impl IndexHit {
    pub fn chunk_id(&self) -> &str {
        self.entry.id()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    DotProduct,
}

impl std::fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::DotProduct => write!(f, "dot_product"),
        }
    }
}

impl std::str::FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" | "dot_product" => Ok(Self::DotProduct),
            _ => Err(format!("Unknown similarity metric: {s}")),
        }
    }
}

/// Vector storage with metadata-filtered nearest-neighbour search.
///
/// Reads must never observe a partially applied write: a query sees either
/// all chunks of a source from before a write, or all from after it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts entries, replacing any with the same chunk id in place.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Removes every chunk of `source_id`, returning how many were removed.
    async fn delete_source(&self, source_id: &str) -> Result<usize>;

    /// Atomically removes every chunk of `source_id` and inserts `entries`.
    async fn replace_source(&self, source_id: &str, entries: Vec<IndexEntry>) -> Result<usize>;

    /// Up to `k` entries passing `filter`, by descending similarity. Ties keep
    /// insertion order.
    async fn query(&self, vector: &[f32], k: usize, filter: &ChunkFilter) -> Result<Vec<IndexHit>>;

    /// Up to `k` entries passing `filter` that contain any of `terms`, best
    /// [`keyword_score`](crate::search::keyword_score) first. Each hit is
    /// scored against `vector` with the same metric as [`Self::query`].
    async fn keyword_candidates(
        &self,
        vector: &[f32],
        terms: &[String],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<IndexHit>>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn source_chunk_ids(&self, source_id: &str) -> Vec<String>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
