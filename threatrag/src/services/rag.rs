use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ContextAssembler, GroundingValidator, PipelineStats, StatsSnapshot};
use crate::config::Config;
use crate::embeddings::{EmbeddingGateway, EmbeddingRegistry};
use crate::error::{RagError, Result};
use crate::index::{InMemoryVectorIndex, VectorIndex};
use crate::llm::prompts::grounded_answer_prompt;
use crate::llm::CompletionService;
use crate::models::{
    AssembledContext, AttributedAnswer, ContextBudget, Document, Query, ValidationReport,
};
use crate::processing::{Chunker, IngestPipeline, IngestReport};
use crate::search::HybridRetriever;

/// Entry point tying the write path and the read path together.
#[derive(Clone)]
pub struct ThreatRag {
    config: Arc<Config>,
    index: Arc<dyn VectorIndex>,
    pipeline: IngestPipeline,
    retriever: HybridRetriever,
    assembler: ContextAssembler,
    validator: GroundingValidator,
    stats: Arc<PipelineStats>,
}

impl ThreatRag {
    /// Builds the embedding backend from the registry and an in-memory index
    /// sized to it.
    pub fn from_config(config: Config) -> Result<Self> {
        Self::from_config_with_registry(config, &EmbeddingRegistry::default())
    }

    pub fn from_config_with_registry(config: Config, registry: &EmbeddingRegistry) -> Result<Self> {
        config.validate()?;
        let gateway = EmbeddingGateway::from_config(&config, registry)?;
        let index = Arc::new(InMemoryVectorIndex::new(
            gateway.dimensions(),
            config.retrieval.similarity,
        ));
        Self::new(config, gateway, index)
    }

    pub fn new(
        config: Config,
        gateway: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(PipelineStats::new());
        let pipeline = IngestPipeline::new(
            Chunker::new(&config.chunking),
            gateway.clone(),
            Arc::clone(&index),
            Arc::clone(&stats),
        )
        .with_concurrency(config.retrieval.ingest_concurrency);
        let retriever = HybridRetriever::new(
            gateway.clone(),
            Arc::clone(&index),
            &config.retrieval,
            &config.retry,
        );

        let mut validator = GroundingValidator::new(&config.grounding);
        if config.grounding.semantic {
            validator = validator.with_semantic(gateway.clone());
        }

        tracing::info!(
            embedding_backend = gateway.backend_name(),
            dimensions = gateway.dimensions(),
            chunk_size = config.chunking.chunk_size,
            top_k = config.retrieval.top_k,
            weights = %config.retrieval.score_weights,
            semantic_grounding = config.grounding.semantic,
            "Threat RAG initialised"
        );

        Ok(Self {
            assembler: ContextAssembler::new(&config.context),
            config: Arc::new(config),
            index,
            pipeline,
            retriever,
            validator,
            stats,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub async fn ingest(&self, document: &Document) -> Result<Vec<String>> {
        self.pipeline.ingest(document).await
    }

    pub async fn ingest_batch(&self, documents: Vec<Document>) -> IngestReport {
        self.pipeline.ingest_batch(documents).await
    }

    pub async fn delete_source(&self, source_id: &str) -> Result<usize> {
        self.pipeline.delete_source(source_id).await
    }

    /// Retrieves and assembles context under the configured budget.
    pub async fn query(&self, query: &Query) -> Result<AssembledContext> {
        self.query_with_budget(query, self.assembler.budget()).await
    }

    pub async fn query_with_budget(
        &self,
        query: &Query,
        budget: ContextBudget,
    ) -> Result<AssembledContext> {
        let query_id = Uuid::new_v4();
        let started = Instant::now();

        let results = match self.retriever.retrieve(query).await {
            Ok(results) => results,
            Err(error) => {
                self.stats.record_query_failure();
                tracing::warn!(%query_id, error = %error, "Query failed");
                return Err(error);
            }
        };

        let retrieved = results.len();
        let context = self.assembler.assemble(&query.text, results, budget);
        let elapsed = started.elapsed();
        self.stats.record_query(elapsed);

        tracing::info!(
            %query_id,
            retrieved,
            included = context.len(),
            sources = context.attributions.len(),
            used = context.used,
            elapsed_ms = elapsed.as_millis() as u64,
            "Query served"
        );

        Ok(context)
    }

    pub async fn validate(&self, answer: &str, context: &AssembledContext) -> ValidationReport {
        let report = self.validator.validate(answer, context).await;
        self.stats.record_validation();
        if !report.skipped && report.faithfulness < 1.0 {
            tracing::info!(
                faithfulness = report.faithfulness,
                unsupported = report.unsupported().count(),
                "Answer contains unsupported sentences"
            );
        }
        report
    }

    /// Full read path: retrieve, assemble, generate, validate.
    ///
    /// Cancellation is observed before and during retrieval and generation;
    /// a cancelled call returns [`RagError::Cancelled`] and writes nothing.
    pub async fn answer(
        &self,
        query: &Query,
        completion: &dyn CompletionService,
        cancel: &CancellationToken,
    ) -> Result<AttributedAnswer> {
        if cancel.is_cancelled() {
            return Err(self.cancelled("before retrieval"));
        }

        let context = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled("during retrieval")),
            context = self.query(query) => context?,
        };

        if cancel.is_cancelled() {
            return Err(self.cancelled("before generation"));
        }

        let prompt = grounded_answer_prompt(&query.text, &context);
        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled("during generation")),
            answer = completion.complete(&prompt) => answer?,
        };

        let report = self.validate(&answer, &context).await;

        Ok(AttributedAnswer {
            answer,
            context,
            report,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn cancelled(&self, stage: &str) -> RagError {
        self.stats.record_cancelled();
        tracing::info!(stage, "Query cancelled");
        RagError::Cancelled
    }
}
