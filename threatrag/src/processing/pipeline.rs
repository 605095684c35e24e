use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;

use super::Chunker;
use crate::embeddings::EmbeddingGateway;
use crate::error::Result;
use crate::index::{IndexEntry, VectorIndex};
use crate::models::Document;
use crate::services::PipelineStats;

/// Async locks keyed by source id. Entries are dropped once nobody holds or
/// waits on them.
#[derive(Clone, Default)]
struct SourceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SourceLocks {
    fn handle(&self, source_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(source_id.to_string()).or_default())
    }

    fn release(&self, source_id: &str, handle: Arc<AsyncMutex<()>>) {
        drop(handle);
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        let idle = locks
            .get(source_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(source_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestOutcome {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-document outcomes of a batch, in input order, plus totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IngestReport {
    pub outcomes: Vec<IngestOutcome>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

impl IngestReport {
    fn from_outcomes(outcomes: Vec<IngestOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            processed: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            chunks_written: outcomes.iter().map(|o| o.chunk_ids.len()).sum(),
            outcomes,
        }
    }
}

/// Write path: validate, chunk, embed, then replace the source's chunks in
/// the index.
///
/// Writes to one source id are serialised; the old chunk set stays visible
/// to readers until the new one is swapped in whole.
#[derive(Clone)]
pub struct IngestPipeline {
    chunker: Chunker,
    gateway: EmbeddingGateway,
    index: Arc<dyn VectorIndex>,
    stats: Arc<PipelineStats>,
    locks: SourceLocks,
    concurrency: usize,
}

impl IngestPipeline {
    pub fn new(
        chunker: Chunker,
        gateway: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            chunker,
            gateway,
            index,
            stats,
            locks: SourceLocks::default(),
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Ingests one document and returns the ids of its chunks in order.
    pub async fn ingest(&self, document: &Document) -> Result<Vec<String>> {
        match self.ingest_inner(document).await {
            Ok(ids) => {
                self.stats.record_ingested(ids.len());
                Ok(ids)
            }
            Err(e) => {
                self.stats.record_ingest_failure();
                tracing::warn!(
                    source_id = %document.source_id,
                    error = %e,
                    "Document ingestion failed"
                );
                Err(e)
            }
        }
    }

    async fn ingest_inner(&self, document: &Document) -> Result<Vec<String>> {
        let started = Instant::now();
        document.validate_for_ingest()?;

        let handle = self.locks.handle(&document.source_id);
        let result = {
            let _guard = handle.lock().await;
            self.write_source(document).await
        };
        self.locks.release(&document.source_id, handle);

        let (ids, removed) = result?;
        tracing::info!(
            source_id = %document.source_id,
            chunks = ids.len(),
            replaced = removed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document ingested"
        );
        Ok(ids)
    }

    async fn write_source(&self, document: &Document) -> Result<(Vec<String>, usize)> {
        let chunks = self.chunker.chunk(document)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.gateway.embed(&texts).await?;

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::new(chunk, vector))
            .collect();

        let removed = self
            .index
            .replace_source(&document.source_id, entries)
            .await?;
        Ok((ids, removed))
    }

    /// Ingests documents with bounded concurrency. One document failing
    /// never affects the others.
    pub async fn ingest_batch(&self, documents: Vec<Document>) -> IngestReport {
        let outcomes: Vec<IngestOutcome> = stream::iter(documents)
            .map(|document| async move {
                match self.ingest(&document).await {
                    Ok(chunk_ids) => IngestOutcome {
                        source_id: document.source_id,
                        chunk_ids,
                        error: None,
                    },
                    Err(e) => IngestOutcome {
                        source_id: document.source_id,
                        chunk_ids: Vec::new(),
                        error: Some(e.to_string()),
                    },
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = IngestReport::from_outcomes(outcomes);
        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            chunks_written = report.chunks_written,
            "Batch ingestion complete"
        );
        report
    }

    pub async fn delete_source(&self, source_id: &str) -> Result<usize> {
        let handle = self.locks.handle(source_id);
        let result = {
            let _guard = handle.lock().await;
            self.index.delete_source(source_id).await
        };
        self.locks.release(source_id, handle);

        let removed = result?;
        if removed > 0 {
            self.stats.record_source_deleted();
        }
        tracing::info!(source_id = %source_id, removed, "Source deleted");
        Ok(removed)
    }
}
