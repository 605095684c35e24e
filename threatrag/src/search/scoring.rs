use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::{Chunk, ScoreBreakdown};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Weights of the composite relevance score. Must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub recency: f64,
    pub confidence: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            keyword: 0.2,
            recency: 0.1,
            confidence: 0.1,
        }
    }
}

impl ScoreWeights {
    pub fn new(semantic: f64, keyword: f64, recency: f64, confidence: f64) -> Result<Self> {
        let weights = Self {
            semantic,
            keyword,
            recency,
            confidence,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn sum(&self) -> f64 {
        self.semantic + self.keyword + self.recency + self.confidence
    }

    pub fn validate(&self) -> Result<()> {
        let parts = [self.semantic, self.keyword, self.recency, self.confidence];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RagError::Config(format!(
                "score weights must be non-negative numbers, got {self}"
            )));
        }
        if (self.sum() - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(RagError::Config(format!(
                "score weights must sum to 1, got {self} (sum {})",
                self.sum()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for ScoreWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.semantic, self.keyword, self.recency, self.confidence
        )
    }
}

/// Parses `semantic,keyword,recency,confidence`.
impl std::str::FromStr for ScoreWeights {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid weight: {e}"))?;

        match parts.as_slice() {
            [semantic, keyword, recency, confidence] => Ok(Self {
                semantic: *semantic,
                keyword: *keyword,
                recency: *recency,
                confidence: *confidence,
            }),
            _ => Err(format!("expected 4 comma-separated weights, got {}", parts.len())),
        }
    }
}

/// Linear decay from 1 at publication to 0 at the staleness horizon.
///
/// Future timestamps score 1; missing timestamps are treated as maximally
/// stale and score 0.
#[derive(Debug, Clone, Copy)]
pub struct RecencyDecay {
    horizon: Duration,
}

impl RecencyDecay {
    pub fn new(horizon_days: u32) -> Self {
        Self {
            horizon: Duration::days(i64::from(horizon_days.max(1))),
        }
    }

    pub fn score(&self, published: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(published) = published else {
            return 0.0;
        };
        let age = now.signed_duration_since(published);
        if age <= Duration::zero() {
            return 1.0;
        }
        let ratio = age.num_seconds() as f64 / self.horizon.num_seconds() as f64;
        (1.0 - ratio).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct CompositeScorer {
    weights: ScoreWeights,
    recency: RecencyDecay,
    default_confidence: f64,
}

impl CompositeScorer {
    pub fn new(weights: ScoreWeights, recency: RecencyDecay, default_confidence: f64) -> Self {
        Self {
            weights,
            recency,
            default_confidence,
        }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn breakdown(
        &self,
        semantic: f64,
        keyword: f64,
        chunk: &Chunk,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        ScoreBreakdown {
            semantic: semantic.clamp(0.0, 1.0),
            keyword: keyword.clamp(0.0, 1.0),
            recency: self.recency.score(chunk.metadata.published_at, now),
            confidence: chunk
                .metadata
                .confidence
                .unwrap_or(self.default_confidence)
                .clamp(0.0, 1.0),
        }
    }

    pub fn composite(&self, breakdown: &ScoreBreakdown) -> f64 {
        self.weights.semantic * breakdown.semantic
            + self.weights.keyword * breakdown.keyword
            + self.weights.recency * breakdown.recency
            + self.weights.confidence * breakdown.confidence
    }
}
