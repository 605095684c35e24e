use std::collections::HashSet;

use crate::config::ContextConfig;
use crate::models::{
    AssembledContext, Attribution, ContextBudget, RetrievedResult, SkipReason, SkippedChunk,
};
use crate::processing::normalize_prefix;

/// Selects ranked results into a bounded, deduplicated context window.
///
/// Results are taken in the order given. A result whose source already
/// contributed text with the same normalised prefix is a duplicate. A result
/// that does not fit the remaining budget is skipped whole and assembly
/// continues, so a smaller later result can still be included.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    budget: ContextBudget,
    dedup_prefix_chars: usize,
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            budget: ContextBudget {
                limit: config.budget,
                unit: config.budget_unit,
            },
            dedup_prefix_chars: config.dedup_prefix_chars.max(1),
        }
    }

    /// The configured default budget.
    pub fn budget(&self) -> ContextBudget {
        self.budget
    }

    pub fn assemble(
        &self,
        query: &str,
        results: Vec<RetrievedResult>,
        budget: ContextBudget,
    ) -> AssembledContext {
        let mut context = AssembledContext::empty(query, budget);
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for result in results {
            let chunk = &result.chunk;
            let key = (
                chunk.source_id.clone(),
                normalize_prefix(&chunk.text, self.dedup_prefix_chars),
            );
            if seen.contains(&key) {
                context.skipped.push(skip(&result, SkipReason::Duplicate));
                continue;
            }

            let cost = budget.measure(&chunk.text);
            if context.used + cost > budget.limit {
                context.skipped.push(skip(&result, SkipReason::OverBudget));
                continue;
            }

            seen.insert(key);
            context.used += cost;
            attribute(&mut context.attributions, &result);
            context.results.push(result);
        }

        tracing::debug!(
            included = context.results.len(),
            skipped = context.skipped.len(),
            used = context.used,
            limit = budget.limit,
            unit = %budget.unit,
            "Context assembled"
        );

        context
    }
}

fn skip(result: &RetrievedResult, reason: SkipReason) -> SkippedChunk {
    SkippedChunk {
        chunk_id: result.chunk.id.clone(),
        source_id: result.chunk.source_id.clone(),
        reason,
    }
}

fn attribute(attributions: &mut Vec<Attribution>, result: &RetrievedResult) {
    let chunk = &result.chunk;
    match attributions
        .iter_mut()
        .find(|a| a.source_id == chunk.source_id)
    {
        Some(existing) => existing.chunk_ids.push(chunk.id.clone()),
        None => {
            let citation = attributions.len() + 1;
            attributions.push(Attribution {
                citation,
                source_id: chunk.source_id.clone(),
                source_type: chunk.metadata.source_type,
                title: chunk.metadata.title.clone(),
                chunk_ids: vec![chunk.id.clone()],
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, ScoreBreakdown};
    use pretty_assertions::assert_eq;

    fn result(id: &str, source: &str, text: &str, score: f64) -> RetrievedResult {
        RetrievedResult {
            chunk: Chunk {
                id: id.to_string(),
                source_id: source.to_string(),
                text: text.to_string(),
                start: 0,
                end: text.len(),
                position: 0,
                content_hash: String::new(),
                metadata: ChunkMetadata::default(),
                embedding: None,
            },
            score,
            breakdown: ScoreBreakdown::default(),
        }
    }

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(&ContextConfig::default())
    }

    fn ids(context: &AssembledContext) -> Vec<&str> {
        context.results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_over_budget_chunk_is_skipped_and_assembly_continues() {
        let results = vec![
            result("a", "s1", &"x".repeat(40), 0.9),
            result("b", "s2", &"y".repeat(50), 0.8),
            result("c", "s3", &"z".repeat(10), 0.7),
        ];

        let context = assembler().assemble("q", results, ContextBudget::chars(60));

        assert_eq!(ids(&context), vec!["a", "c"]);
        assert_eq!(context.used, 50);
        assert_eq!(context.skipped.len(), 1);
        assert_eq!(context.skipped[0].chunk_id, "b");
        assert_eq!(context.skipped[0].reason, SkipReason::OverBudget);
    }

    #[test]
    fn test_size_never_exceeds_budget_and_last_chunk_counts() {
        let results: Vec<RetrievedResult> = (0..20)
            .map(|i| {
                result(
                    &format!("c{i:02}"),
                    &format!("s{i}"),
                    &"w ".repeat(5 + i * 3),
                    1.0 - i as f64 / 100.0,
                )
            })
            .collect();

        let budget = ContextBudget::tokens(50);
        let context = assembler().assemble("q", results, budget);

        let total: usize = context.results.iter().map(|r| budget.measure(&r.chunk.text)).sum();
        assert_eq!(total, context.used);
        assert!(context.used <= budget.limit);

        let last = context.results.last().unwrap();
        assert!(context.used - budget.measure(&last.chunk.text) < context.used);
    }

    #[test]
    fn test_duplicate_prefix_from_same_source_is_dropped() {
        let results = vec![
            result("a", "s1", "APT28 targets   NATO governments.", 0.9),
            result("b", "s1", "apt28 targets NATO governments.", 0.8),
            result("c", "s2", "APT28 targets NATO governments.", 0.7),
        ];

        let context = assembler().assemble("q", results, ContextBudget::chars(1000));

        assert_eq!(ids(&context), vec!["a", "c"]);
        assert_eq!(context.skipped[0].chunk_id, "b");
        assert_eq!(context.skipped[0].reason, SkipReason::Duplicate);
    }

    #[test]
    fn test_attributions_numbered_by_first_appearance() {
        let results = vec![
            result("a1", "alpha", "First alpha chunk.", 0.9),
            result("b1", "beta", "First beta chunk.", 0.8),
            result("a2", "alpha", "Second alpha chunk.", 0.7),
        ];

        let context = assembler().assemble("q", results, ContextBudget::chars(1000));

        assert_eq!(context.attributions.len(), 2);
        assert_eq!(context.attributions[0].citation, 1);
        assert_eq!(context.attributions[0].source_id, "alpha");
        assert_eq!(context.attributions[0].chunk_ids, vec!["a1", "a2"]);
        assert_eq!(context.attributions[1].citation, 2);
        assert_eq!(context.citation_for("beta"), Some(2));
    }

    #[test]
    fn test_render_uses_citation_numbers() {
        let results = vec![
            result("a1", "alpha", "Alpha text.", 0.9),
            result("b1", "beta", "Beta text.", 0.8),
        ];
        let context = assembler().assemble("q", results, ContextBudget::chars(1000));

        assert_eq!(
            context.render(),
            "[1] alpha (alpha)\nAlpha text.\n\n[2] beta (beta)\nBeta text."
        );
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let make = || {
            vec![
                result("a", "s1", "One.", 0.9),
                result("b", "s1", "one.", 0.8),
                result("c", "s2", &"long ".repeat(30), 0.7),
                result("d", "s3", "Three.", 0.6),
            ]
        };
        let first = assembler().assemble("q", make(), ContextBudget::chars(40));
        let second = assembler().assemble("q", make(), ContextBudget::chars(40));
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_results() {
        let context = assembler().assemble("q", Vec::new(), ContextBudget::chars(10));
        assert!(context.is_empty());
        assert_eq!(context.used, 0);
        assert!(context.attributions.is_empty());
    }
}
