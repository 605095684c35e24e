use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Document, Metadata, SourceType};

/// A contiguous span of one document, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Derived from the source id and start offset, so re-chunking is idempotent.
    pub id: String,
    pub source_id: String,
    pub text: String,
    /// Byte offsets into the source text, `start..end`.
    pub start: usize,
    pub end: usize,
    pub position: usize,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Document metadata copied onto every chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkMetadata {
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub techniques: Vec<String>,
    #[serde(default)]
    pub cves: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub extra: Metadata,
}

impl ChunkMetadata {
    pub fn from_document(document: &Document) -> Self {
        Self {
            source_type: document.source_type,
            title: document.title.clone(),
            published_at: document.published_at,
            actors: document.metadata.actors.clone(),
            techniques: document
                .metadata
                .techniques
                .iter()
                .map(|t| t.trim().to_uppercase())
                .collect(),
            cves: document
                .metadata
                .cves
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
            confidence: document.metadata.confidence,
            extra: document.metadata.extra.clone(),
        }
    }
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}
