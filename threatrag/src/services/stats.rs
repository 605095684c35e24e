use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide counters. Updated with relaxed atomics; a snapshot is
/// internally consistent per field, not across fields.
#[derive(Debug, Default)]
pub struct PipelineStats {
    documents_ingested: AtomicU64,
    documents_failed: AtomicU64,
    chunks_written: AtomicU64,
    sources_deleted: AtomicU64,
    queries_served: AtomicU64,
    queries_failed: AtomicU64,
    queries_cancelled: AtomicU64,
    answers_validated: AtomicU64,
    query_latency_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct StatsSnapshot {
    pub documents_ingested: u64,
    pub documents_failed: u64,
    pub chunks_written: u64,
    pub sources_deleted: u64,
    pub queries_served: u64,
    pub queries_failed: u64,
    pub queries_cancelled: u64,
    pub answers_validated: u64,
    pub total_query_latency_ms: f64,
}

impl StatsSnapshot {
    pub fn average_query_latency_ms(&self) -> Option<f64> {
        (self.queries_served > 0).then(|| self.total_query_latency_ms / self.queries_served as f64)
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingested(&self, chunks: usize) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_written
            .fetch_add(chunks as u64, Ordering::Relaxed);
    }

    pub fn record_ingest_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_deleted(&self) {
        self.sources_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, latency: Duration) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        self.query_latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_query_failure(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.queries_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation(&self) {
        self.answers_validated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            sources_deleted: self.sources_deleted.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            queries_cancelled: self.queries_cancelled.load(Ordering::Relaxed),
            answers_validated: self.answers_validated.load(Ordering::Relaxed),
            total_query_latency_ms: self.query_latency_micros.load(Ordering::Relaxed) as f64
                / 1000.0,
        }
    }
}
