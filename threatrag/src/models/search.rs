use serde::{Deserialize, Serialize};

use super::Chunk;

/// Per-signal contributions before weighting. Every component is in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub keyword: f64,
    pub recency: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedResult {
    pub chunk: Chunk,
    /// Weighted composite of the breakdown.
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}
