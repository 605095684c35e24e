use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::config::GroundingConfig;
use crate::embeddings::EmbeddingGateway;
use crate::index::cosine_similarity;
use crate::models::{AssembledContext, SentenceSupport, ValidationReport};
use crate::processing::{sentence_spans, tokenize};

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[\d+(?:\s*[,;]\s*\d+)*\]").expect("valid citation regex")
    })
}

/// Scores how well each sentence of an answer is backed by the assembled
/// context.
///
/// Lexical support of a sentence against one chunk is the fraction of the
/// sentence's distinct content tokens that appear in the chunk. With a
/// gateway attached, the cosine similarity of sentence and chunk embeddings
/// is also computed and the larger of the two is used. Validation never
/// fails: embedding errors fall back to lexical scoring.
#[derive(Clone)]
pub struct GroundingValidator {
    threshold: f64,
    semantic: Option<EmbeddingGateway>,
}

struct ScoredSentence {
    index: usize,
    start: usize,
    end: usize,
    tokens: Vec<String>,
}

impl GroundingValidator {
    pub fn new(config: &GroundingConfig) -> Self {
        Self {
            threshold: config.support_threshold.clamp(0.0, 1.0),
            semantic: None,
        }
    }

    pub fn with_semantic(mut self, gateway: EmbeddingGateway) -> Self {
        self.semantic = Some(gateway);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub async fn validate(&self, answer: &str, context: &AssembledContext) -> ValidationReport {
        if answer.trim().is_empty() {
            return ValidationReport::skipped("answer is empty", self.threshold);
        }

        let sentences: Vec<ScoredSentence> = sentence_spans(answer)
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let stripped = citation_pattern().replace_all(&answer[start..end], " ");
                ScoredSentence {
                    index,
                    start,
                    end,
                    tokens: distinct(tokenize(&stripped)),
                }
            })
            .collect();

        if sentences.iter().all(|s| s.tokens.is_empty()) {
            return ValidationReport::skipped("answer has no scorable sentences", self.threshold);
        }

        let chunk_terms: Vec<HashSet<String>> = context
            .results
            .iter()
            .map(|r| tokenize(&r.chunk.text).into_iter().collect())
            .collect();

        let lexical: Vec<Vec<f64>> = sentences
            .iter()
            .map(|sentence| {
                chunk_terms
                    .iter()
                    .map(|terms| lexical_support(&sentence.tokens, terms))
                    .collect()
            })
            .collect();

        let semantic = self.semantic_scores(answer, &sentences, context).await;

        let mut supported_count = 0usize;
        let mut scored_count = 0usize;
        let mut supports = Vec::with_capacity(sentences.len());

        for (i, sentence) in sentences.iter().enumerate() {
            let scored = !sentence.tokens.is_empty();
            let mut best: Option<(usize, f64)> = None;

            if scored {
                for (c, &lex) in lexical[i].iter().enumerate() {
                    let score = match &semantic {
                        Some(matrix) => lex.max(matrix[i][c]),
                        None => lex,
                    };
                    if best.map_or(true, |(_, b)| score > b) {
                        best = Some((c, score));
                    }
                }
            }

            let support = best.map_or(0.0, |(_, s)| s);
            let supported = scored && support >= self.threshold;
            if scored {
                scored_count += 1;
                if supported {
                    supported_count += 1;
                }
            }

            supports.push(SentenceSupport {
                index: sentence.index,
                text: answer[sentence.start..sentence.end].to_string(),
                start: sentence.start,
                end: sentence.end,
                support,
                supported,
                scored,
                best_chunk_id: best.map(|(c, _)| context.results[c].chunk.id.clone()),
            });
        }

        let faithfulness = supported_count as f64 / scored_count as f64;

        tracing::debug!(
            sentences = supports.len(),
            scored = scored_count,
            supported = supported_count,
            faithfulness,
            "Answer grounding checked"
        );

        ValidationReport {
            sentences: supports,
            faithfulness,
            threshold: self.threshold,
            skipped: false,
            skip_reason: None,
        }
    }

    /// Sentence x chunk cosine matrix, or `None` when semantic scoring is off
    /// or the embedding call fails.
    async fn semantic_scores(
        &self,
        answer: &str,
        sentences: &[ScoredSentence],
        context: &AssembledContext,
    ) -> Option<Vec<Vec<f64>>> {
        let gateway = self.semantic.as_ref()?;
        if context.results.is_empty() {
            return None;
        }

        let mut texts: Vec<String> = sentences
            .iter()
            .map(|s| answer[s.start..s.end].to_string())
            .collect();
        texts.extend(context.results.iter().map(|r| r.chunk.text.clone()));

        let vectors = match gateway.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "Semantic grounding unavailable, falling back to lexical support"
                );
                return None;
            }
        };

        let (sentence_vectors, chunk_vectors) = vectors.split_at(sentences.len());
        Some(
            sentence_vectors
                .iter()
                .map(|s| {
                    chunk_vectors
                        .iter()
                        .map(|c| f64::from(cosine_similarity(s, c)).clamp(0.0, 1.0))
                        .collect()
                })
                .collect(),
        )
    }
}

fn lexical_support(tokens: &[String], chunk_terms: &HashSet<String>) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let found = tokens.iter().filter(|t| chunk_terms.contains(*t)).count();
    found as f64 / tokens.len() as f64
}

fn distinct(tokens: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}
