use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::{ChunkFilter, IndexEntry, IndexHit, SimilarityMetric, VectorIndex};
use crate::error::{RagError, Result};
use crate::processing::term_frequencies;
use crate::search::keyword_score;

struct Record {
    entry: Arc<IndexEntry>,
    norm: f32,
    terms: HashMap<String, u32>,
}

impl Record {
    fn new(entry: IndexEntry) -> Self {
        let norm = entry.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        let terms = term_frequencies(&entry.chunk.text);
        Self {
            entry: Arc::new(entry),
            norm,
            terms,
        }
    }
}

/// Immutable view of the index. Records are kept in insertion order.
#[derive(Default, Clone)]
struct Snapshot {
    records: Vec<Arc<Record>>,
}

impl Snapshot {
    fn remove_source(&mut self, source_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.entry.source_id() != source_id);
        before - self.records.len()
    }

    fn upsert(&mut self, entries: Vec<IndexEntry>) {
        let mut positions: HashMap<String, usize> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.entry.id().to_string(), i))
            .collect();

        for entry in entries {
            let record = Arc::new(Record::new(entry));
            match positions.get(record.entry.id()) {
                Some(&i) => self.records[i] = record,
                None => {
                    positions.insert(record.entry.id().to_string(), self.records.len());
                    self.records.push(record);
                }
            }
        }
    }
}

/// In-process vector index with copy-on-write snapshots.
///
/// Readers clone the current `Arc<Snapshot>` and search it without holding
/// any lock, so queries never wait on writers. Writers are serialised,
/// build a new snapshot and publish it with one pointer swap.
pub struct InMemoryVectorIndex {
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    dimensions: usize,
    metric: SimilarityMetric,
}

impl InMemoryVectorIndex {
    pub fn new(dimensions: usize, metric: SimilarityMetric) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
            dimensions,
            metric,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn current(&self) -> Arc<Snapshot> {
        let guard = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    fn check_dimensions(&self, entries: &[IndexEntry]) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != self.dimensions) {
            return Err(RagError::Config(format!(
                "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                bad.id(),
                self.dimensions,
                bad.vector.len()
            )));
        }
        Ok(())
    }

    fn check_query(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(RagError::Config(format!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }

    /// Applies `edit` to a private copy of the current snapshot and publishes it.
    fn write<T>(&self, edit: impl FnOnce(&mut Snapshot) -> T) -> T {
        let _writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut next = Snapshot::clone(&self.current());
        let outcome = edit(&mut next);

        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Arc::new(next);
        outcome
    }

    fn similarity(&self, query: &[f32], query_norm: f32, record: &Record) -> f64 {
        let dot: f32 = query
            .iter()
            .zip(record.entry.vector.iter())
            .map(|(a, b)| a * b)
            .sum();
        let score = match self.metric {
            SimilarityMetric::DotProduct => dot,
            SimilarityMetric::Cosine => {
                let denom = query_norm * record.norm;
                if denom < f32::EPSILON {
                    0.0
                } else {
                    dot / denom
                }
            }
        };
        f64::from(score)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.check_dimensions(&entries)?;
        let count = entries.len();
        self.write(|snapshot| snapshot.upsert(entries));
        tracing::debug!(count, "Upserted index entries");
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> Result<usize> {
        let removed = self.write(|snapshot| snapshot.remove_source(source_id));
        tracing::debug!(source_id, removed, "Deleted source from index");
        Ok(removed)
    }

    async fn replace_source(&self, source_id: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        self.check_dimensions(&entries)?;
        if let Some(foreign) = entries.iter().find(|e| e.source_id() != source_id) {
            return Err(RagError::Validation(format!(
                "Chunk {} belongs to source '{}', not '{source_id}'",
                foreign.id(),
                foreign.source_id()
            )));
        }

        let inserted = entries.len();
        let removed = self.write(|snapshot| {
            let removed = snapshot.remove_source(source_id);
            snapshot.upsert(entries);
            removed
        });
        tracing::debug!(source_id, removed, inserted, "Replaced source in index");
        Ok(removed)
    }

    async fn query(&self, vector: &[f32], k: usize, filter: &ChunkFilter) -> Result<Vec<IndexHit>> {
        self.check_query(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let snapshot = self.current();
        let query_norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();

        let mut hits: Vec<IndexHit> = snapshot
            .records
            .iter()
            .filter(|record| filter.matches(&record.entry.chunk))
            .map(|record| IndexHit {
                entry: Arc::clone(&record.entry),
                score: self.similarity(vector, query_norm, record),
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn keyword_candidates(
        &self,
        vector: &[f32],
        terms: &[String],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<IndexHit>> {
        self.check_query(vector)?;
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let snapshot = self.current();
        let query_norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();

        let mut matched: Vec<(f64, &Record)> = snapshot
            .records
            .iter()
            .filter_map(|record| {
                let relevance = keyword_score(terms, &record.terms);
                (relevance > 0.0 && filter.matches(&record.entry.chunk))
                    .then_some((relevance, record.as_ref()))
            })
            .collect();

        matched.sort_by(|a, b| b.0.total_cmp(&a.0));
        matched.truncate(k);
        Ok(matched
            .into_iter()
            .map(|(_, record)| IndexHit {
                entry: Arc::clone(&record.entry),
                score: self.similarity(vector, query_norm, record),
            })
            .collect())
    }

    async fn len(&self) -> usize {
        self.current().records.len()
    }

    async fn source_chunk_ids(&self, source_id: &str) -> Vec<String> {
        self.current()
            .records
            .iter()
            .filter(|r| r.entry.source_id() == source_id)
            .map(|r| r.entry.id().to_string())
            .collect()
    }
}
