use std::collections::HashMap;

/// Term-frequency saturation constant, as in BM25.
const K1: f64 = 1.2;

/// Keyword relevance in [0, 1].
///
/// Each query term contributes `tf / (tf + K1)`, which approaches 1 as the
/// term repeats; the result is the mean over query terms, so a chunk
/// containing none of them scores 0.
pub fn keyword_score(query_terms: &[String], chunk_terms: &HashMap<String, u32>) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }

    let total: f64 = query_terms
        .iter()
        .map(|term| {
            let tf = f64::from(chunk_terms.get(term).copied().unwrap_or(0));
            tf / (tf + K1)
        })
        .sum();

    (total / query_terms.len() as f64).clamp(0.0, 1.0)
}
