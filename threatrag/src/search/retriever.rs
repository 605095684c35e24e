use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{keyword_score, CompositeScorer, RecencyDecay};
use crate::config::{RetrievalConfig, RetryConfig};
use crate::embeddings::EmbeddingGateway;
use crate::error::{RagError, Result};
use crate::index::{ChunkFilter, IndexEntry, VectorIndex};
use crate::models::{Query, RetrievedResult};
use crate::processing::{term_frequencies, tokenize};
use crate::retry::RetryPolicy;

/// Semantic + keyword retrieval with composite re-ranking.
///
/// The query is embedded once; the index is asked for `top_k * overfetch`
/// nearest neighbours and for keyword candidates under the same filter. The
/// union is scored, sorted by composite score (ties by chunk id) and cut to
/// `top_k`. Nothing is written on this path.
#[derive(Clone)]
pub struct HybridRetriever {
    gateway: EmbeddingGateway,
    index: Arc<dyn VectorIndex>,
    scorer: CompositeScorer,
    top_k: usize,
    overfetch_factor: usize,
    default_confidence: f64,
    index_retry: RetryPolicy,
}

impl HybridRetriever {
    pub fn new(
        gateway: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
        config: &RetrievalConfig,
        retry: &RetryConfig,
    ) -> Self {
        let scorer = CompositeScorer::new(
            config.score_weights,
            RecencyDecay::new(config.staleness_horizon_days),
            config.default_confidence,
        );
        let index_retry = RetryPolicy::new(
            retry.max_attempts,
            Duration::from_millis(config.index_timeout_ms),
        )
        .with_base_delay(Duration::from_millis(retry.base_delay_ms));

        Self {
            gateway,
            index,
            scorer,
            top_k: config.top_k,
            overfetch_factor: config.overfetch_factor.max(3),
            default_confidence: config.default_confidence,
            index_retry,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    pub async fn retrieve(&self, query: &Query) -> Result<Vec<RetrievedResult>> {
        self.retrieve_at(query, Utc::now()).await
    }

    /// Like [`Self::retrieve`], with recency measured from `now`.
    pub async fn retrieve_at(
        &self,
        query: &Query,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetrievedResult>> {
        let started = Instant::now();
        let top_k = query.top_k.unwrap_or(self.top_k);
        let text = query.text.trim();
        if text.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let filter = ChunkFilter::new(&query.filter, self.default_confidence);
        let fetch_k = top_k.saturating_mul(self.overfetch_factor);

        let query_vector = self
            .gateway
            .embed_one(text)
            .await
            .map_err(RagError::retrieval)?;

        let semantic = self
            .index_retry
            .run("index query", || {
                self.index.query(&query_vector, fetch_k, &filter)
            })
            .await
            .map_err(RagError::retrieval)?;

        let terms = distinct(tokenize(text));
        let keyword = self
            .index_retry
            .run("keyword candidates", || {
                self.index
                    .keyword_candidates(&query_vector, &terms, fetch_k, &filter)
            })
            .await
            .map_err(RagError::retrieval)?;

        let semantic_count = semantic.len();
        let mut seen: HashSet<String> = HashSet::with_capacity(semantic_count + keyword.len());
        let mut candidates: Vec<(Arc<IndexEntry>, f64)> = Vec::with_capacity(seen.capacity());

        for hit in semantic.into_iter().chain(keyword) {
            if seen.insert(hit.entry.id().to_string()) {
                candidates.push((hit.entry, hit.score));
            }
        }
        let candidate_count = candidates.len();

        let mut results: Vec<RetrievedResult> = candidates
            .into_iter()
            .filter(|(entry, _)| filter.matches(&entry.chunk))
            .map(|(entry, semantic)| {
                let keyword = keyword_score(&terms, &term_frequencies(&entry.chunk.text));
                let breakdown = self.scorer.breakdown(semantic, keyword, &entry.chunk, now);
                RetrievedResult {
                    score: self.scorer.composite(&breakdown),
                    chunk: entry.chunk.clone(),
                    breakdown,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        results.truncate(top_k);

        tracing::debug!(
            top_k,
            fetch_k,
            semantic_candidates = semantic_count,
            total_candidates = candidate_count,
            returned = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Hybrid retrieval complete"
        );

        Ok(results)
    }
}

fn distinct(tokens: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embeddings::{EmbeddingBackend, HashingEmbedder};
    use crate::index::{IndexHit, InMemoryVectorIndex, SimilarityMetric};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::models::{Chunk, ChunkMetadata, Document};
    use crate::processing::Chunker;
    use crate::search::ScoreWeights;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};

    const DIMS: usize = 256;

    fn gateway() -> EmbeddingGateway {
        EmbeddingGateway::new(
            Arc::new(HashingEmbedder::new("test", DIMS)),
            RetryPolicy::new(1, Duration::from_secs(1)),
        )
    }

    fn retriever_with(index: Arc<dyn VectorIndex>, config: &RetrievalConfig) -> HybridRetriever {
        HybridRetriever::new(gateway(), index, config, &Config::default().retry)
    }

    async fn index_documents(docs: &[Document]) -> Arc<InMemoryVectorIndex> {
        let index = Arc::new(InMemoryVectorIndex::new(DIMS, SimilarityMetric::Cosine));
        let embedder = HashingEmbedder::new("test", DIMS);
        for doc in docs {
            let entries = Chunker::default()
                .chunk(doc)
                .unwrap()
                .into_iter()
                .map(|chunk| {
                    let vector = embedder.embed_text(&chunk.text);
                    IndexEntry::new(chunk, vector)
                })
                .collect();
            index.replace_source(&doc.source_id, entries).await.unwrap();
        }
        index
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_apt29_query_returns_tagged_chunk() {
        let index = index_documents(&[Document::new(
            "report-apt29",
            "APT29 uses spear-phishing and PowerShell persistence",
        )
        .with_actor("APT29")])
        .await;
        let retriever = retriever_with(index, &RetrievalConfig::default());

        let results = retriever
            .retrieve_at(&Query::new("What techniques does APT29 use?"), now())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_id, "report-apt29");

        let filtered = retriever
            .retrieve_at(&Query::new("What techniques does APT29 use?").with_actor("APT28"), now())
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_results_sorted_and_truncated() {
        let docs: Vec<Document> = (0..6)
            .map(|i| {
                Document::new(
                    format!("feed-{i}"),
                    format!("Lazarus deploys loader variant {i} against exchanges"),
                )
            })
            .collect();
        let index = index_documents(&docs).await;
        let retriever = retriever_with(index, &RetrievalConfig::default());

        let results = retriever
            .retrieve_at(&Query::new("Lazarus loader").with_top_k(4), now())
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        for pair in results.windows(2) {
            assert!(
                pair[0].score > pair[1].score
                    || (pair[0].score == pair[1].score && pair[0].chunk.id < pair[1].chunk.id)
            );
        }
    }

    #[tokio::test]
    async fn test_zero_recency_weight_gives_equal_scores_for_timestamp_only_difference() {
        let text = "Sandworm targets industrial control systems";
        let docs = vec![
            Document::new("old", text).with_published_at(now() - ChronoDuration::days(900)),
            Document::new("new", text).with_published_at(now()),
        ];
        let index = index_documents(&docs).await;

        let config = RetrievalConfig {
            score_weights: ScoreWeights::new(0.7, 0.2, 0.0, 0.1).unwrap(),
            ..Default::default()
        };
        let results = retriever_with(index, &config)
            .retrieve_at(&Query::new("Sandworm industrial"), now())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, results[1].score);
        assert!(results[0].chunk.id < results[1].chunk.id);
    }

    #[tokio::test]
    async fn test_recency_breaks_otherwise_equal_chunks() {
        let text = "Sandworm targets industrial control systems";
        let docs = vec![
            Document::new("old", text).with_published_at(now() - ChronoDuration::days(300)),
            Document::new("new", text).with_published_at(now()),
        ];
        let index = index_documents(&docs).await;
        let results = retriever_with(index, &RetrievalConfig::default())
            .retrieve_at(&Query::new("Sandworm industrial"), now())
            .await
            .unwrap();

        assert_eq!(results[0].chunk.source_id, "new");
        assert!(results[0].breakdown.recency > results[1].breakdown.recency);
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let index = index_documents(&[Document::new("a", "Some text here.")]).await;
        let retriever = retriever_with(index, &RetrievalConfig::default());
        assert!(retriever.retrieve(&Query::new("   ")).await.unwrap().is_empty());
        assert!(retriever
            .retrieve(&Query::new("text").with_top_k(0))
            .await
            .unwrap()
            .is_empty());
    }

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn upsert(&self, _entries: Vec<IndexEntry>) -> Result<()> {
            Ok(())
        }
        async fn delete_source(&self, _source_id: &str) -> Result<usize> {
            Ok(0)
        }
        async fn replace_source(&self, _source_id: &str, _entries: Vec<IndexEntry>) -> Result<usize> {
            Ok(0)
        }
        async fn query(
            &self,
            _vector: &[f32],
            _k: usize,
            _filter: &ChunkFilter,
        ) -> Result<Vec<IndexHit>> {
            Err(RagError::Index("index offline".to_string()))
        }
        async fn keyword_candidates(
            &self,
            _vector: &[f32],
            _terms: &[String],
            _k: usize,
            _filter: &ChunkFilter,
        ) -> Result<Vec<IndexHit>> {
            Ok(Vec::new())
        }
        async fn len(&self) -> usize {
            0
        }
        async fn source_chunk_ids(&self, _source_id: &str) -> Vec<String> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_index_failure_surfaces_as_retrieval_error() {
        let retriever = retriever_with(Arc::new(FailingIndex), &RetrievalConfig::default());
        let err = retriever.retrieve(&Query::new("APT29")).await.unwrap_err();
        match err {
            RagError::Retrieval(inner) => assert!(matches!(*inner, RagError::Index(_))),
            other => panic!("expected retrieval error, got {other:?}"),
        }
    }

    struct DownBackend;

    #[async_trait]
    impl EmbeddingBackend for DownBackend {
        fn name(&self) -> &str {
            "down"
        }
        fn dimensions(&self) -> usize {
            DIMS
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(RagError::embedding("auth failed"))
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_surfaces_as_retrieval_error() {
        let index = index_documents(&[Document::new("a", "APT29 text.")]).await;
        let retriever = HybridRetriever::new(
            EmbeddingGateway::new(Arc::new(DownBackend), RetryPolicy::default()),
            index,
            &RetrievalConfig::default(),
            &Config::default().retry,
        );
        let err = retriever.retrieve(&Query::new("APT29")).await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_keyword_only_candidate_is_considered() {
        // A chunk with the query term but a vector orthogonal to the query
        // still reaches the result set through keyword candidates.
        let index = Arc::new(InMemoryVectorIndex::new(DIMS, SimilarityMetric::Cosine));
        let chunk = Chunk {
            id: "kw".to_string(),
            source_id: "s".to_string(),
            text: "Kimsuky phishing lures".to_string(),
            start: 0,
            end: 22,
            position: 0,
            content_hash: String::new(),
            metadata: ChunkMetadata::default(),
            embedding: None,
        };
        index
            .upsert(vec![IndexEntry::new(chunk, vec![0.0; DIMS])])
            .await
            .unwrap();

        let results = retriever_with(index, &RetrievalConfig::default())
            .retrieve_at(&Query::new("Kimsuky"), now())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].breakdown.semantic, 0.0);
        assert!(results[0].breakdown.keyword > 0.0);
    }

    /// Embeds every text as the same fixed vector.
    struct FixedBackend(Vec<f32>);

    #[async_trait]
    impl EmbeddingBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            self.0.len()
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    fn plain_entry(id: &str, text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry::new(
            Chunk {
                id: id.to_string(),
                source_id: id.to_string(),
                text: text.to_string(),
                start: 0,
                end: text.len(),
                position: 0,
                content_hash: String::new(),
                metadata: ChunkMetadata::default(),
                embedding: None,
            },
            vector,
        )
    }

    #[tokio::test]
    async fn test_keyword_only_candidate_uses_index_metric() {
        let index = Arc::new(InMemoryVectorIndex::new(2, SimilarityMetric::DotProduct));
        index
            .upsert(vec![
                plain_entry("a", "Unrelated infrastructure notes", vec![0.9, 0.0]),
                plain_entry("b", "Unrelated hosting notes", vec![0.9, 0.0]),
                plain_entry("c", "Unrelated registrar notes", vec![0.9, 0.0]),
                plain_entry("d", "Turla implant", vec![0.2, 0.0]),
            ])
            .await
            .unwrap();

        let retriever = HybridRetriever::new(
            EmbeddingGateway::new(
                Arc::new(FixedBackend(vec![1.0, 0.0])),
                RetryPolicy::new(1, Duration::from_secs(1)),
            ),
            index,
            &RetrievalConfig::default(),
            &Config::default().retry,
        );

        let top = retriever
            .retrieve_at(&Query::new("Turla").with_top_k(1), now())
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].chunk.id, "a");

        let all = retriever
            .retrieve_at(&Query::new("Turla").with_top_k(4), now())
            .await
            .unwrap();
        let d = all.iter().find(|r| r.chunk.id == "d").unwrap();
        assert!((d.breakdown.semantic - 0.2).abs() < 1e-6);
    }

    /// Delegates to an in-memory index and counts `query` calls.
    struct CountingIndex {
        inner: InMemoryVectorIndex,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for CountingIndex {
        async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
            self.inner.upsert(entries).await
        }
        async fn delete_source(&self, source_id: &str) -> Result<usize> {
            self.inner.delete_source(source_id).await
        }
        async fn replace_source(&self, source_id: &str, entries: Vec<IndexEntry>) -> Result<usize> {
            self.inner.replace_source(source_id, entries).await
        }
        async fn query(
            &self,
            vector: &[f32],
            k: usize,
            filter: &ChunkFilter,
        ) -> Result<Vec<IndexHit>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query(vector, k, filter).await
        }
        async fn keyword_candidates(
            &self,
            vector: &[f32],
            terms: &[String],
            k: usize,
            filter: &ChunkFilter,
        ) -> Result<Vec<IndexHit>> {
            self.inner.keyword_candidates(vector, terms, k, filter).await
        }
        async fn len(&self) -> usize {
            self.inner.len().await
        }
        async fn source_chunk_ids(&self, source_id: &str) -> Vec<String> {
            self.inner.source_chunk_ids(source_id).await
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_not_retried() {
        let index = Arc::new(CountingIndex {
            inner: InMemoryVectorIndex::new(8, SimilarityMetric::Cosine),
            queries: AtomicUsize::new(0),
        });
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        };
        let retriever = HybridRetriever::new(
            gateway(),
            Arc::clone(&index) as Arc<dyn VectorIndex>,
            &RetrievalConfig::default(),
            &retry,
        );

        let err = retriever.retrieve(&Query::new("APT29")).await.unwrap_err();
        match err {
            RagError::Retrieval(inner) => assert!(matches!(*inner, RagError::Config(_))),
            other => panic!("expected retrieval error, got {other:?}"),
        }
        assert_eq!(index.queries.load(Ordering::SeqCst), 1);
    }
}
