use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use super::{RetrievedResult, SourceType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BudgetUnit {
    #[default]
    Chars,
    /// Estimated as `ceil(chars / 4)`.
    Tokens,
}

impl std::fmt::Display for BudgetUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chars => write!(f, "chars"),
            Self::Tokens => write!(f, "tokens"),
        }
    }
}

impl std::str::FromStr for BudgetUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chars" | "characters" => Ok(Self::Chars),
            "tokens" => Ok(Self::Tokens),
            _ => Err(format!("Unknown budget unit: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextBudget {
    pub limit: usize,
    pub unit: BudgetUnit,
}

impl ContextBudget {
    pub fn chars(limit: usize) -> Self {
        Self {
            limit,
            unit: BudgetUnit::Chars,
        }
    }

    pub fn tokens(limit: usize) -> Self {
        Self {
            limit,
            unit: BudgetUnit::Tokens,
        }
    }

    /// Cost of `text` in this budget's unit.
    pub fn measure(&self, text: &str) -> usize {
        let chars = text.chars().count();
        match self.unit {
            BudgetUnit::Chars => chars,
            BudgetUnit::Tokens => chars.div_ceil(4),
        }
    }
}

/// Source attribution for one cited document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attribution {
    /// 1-based citation number, in order of first appearance.
    pub citation: usize,
    pub source_id: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Duplicate,
    OverBudget,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub reason: SkipReason,
}

/// Ranked, deduplicated, budget-bounded evidence for one generation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssembledContext {
    pub query: String,
    pub results: Vec<RetrievedResult>,
    pub attributions: Vec<Attribution>,
    pub budget: ContextBudget,
    /// Cumulative cost of the included chunks in `budget.unit`.
    pub used: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedChunk>,
}

impl AssembledContext {
    pub fn empty(query: impl Into<String>, budget: ContextBudget) -> Self {
        Self {
            query: query.into(),
            results: Vec::new(),
            attributions: Vec::new(),
            budget,
            used: 0,
            skipped: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn citation_for(&self, source_id: &str) -> Option<usize> {
        self.attributions
            .iter()
            .find(|a| a.source_id == source_id)
            .map(|a| a.citation)
    }

    /// Prompt-ready rendering: one block per chunk, prefixed with the
    /// citation number of its source.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            let chunk = &result.chunk;
            let citation = self.citation_for(&chunk.source_id).unwrap_or(0);
            let label = chunk.metadata.title.as_deref().unwrap_or(&chunk.source_id);
            let _ = writeln!(out, "[{citation}] {label} ({})", chunk.source_id);
            out.push_str(chunk.text.trim());
            out.push_str("\n\n");
        }
        out.truncate(out.trim_end().len());
        out
    }
}
