use serde::{Deserialize, Serialize};

use super::AssembledContext;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentenceSupport {
    pub index: usize,
    pub text: String,
    /// Byte offsets into the answer.
    pub start: usize,
    pub end: usize,
    pub support: f64,
    pub supported: bool,
    /// False for sentences without content tokens; those are not counted
    /// towards faithfulness.
    pub scored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_chunk_id: Option<String>,
}

/// Advisory grounding report. Never blocks delivery of an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub sentences: Vec<SentenceSupport>,
    /// Fraction of scored sentences that are supported.
    pub faithfulness: f64,
    pub threshold: f64,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ValidationReport {
    pub fn skipped(reason: impl Into<String>, threshold: f64) -> Self {
        Self {
            sentences: Vec::new(),
            faithfulness: 0.0,
            threshold,
            skipped: true,
            skip_reason: Some(reason.into()),
        }
    }

    pub fn unsupported(&self) -> impl Iterator<Item = &SentenceSupport> {
        self.sentences.iter().filter(|s| s.scored && !s.supported)
    }

    pub fn scored_count(&self) -> usize {
        self.sentences.iter().filter(|s| s.scored).count()
    }
}

/// A generated answer together with the evidence it was built from and its
/// grounding report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedAnswer {
    pub answer: String,
    pub context: AssembledContext,
    pub report: ValidationReport,
}
