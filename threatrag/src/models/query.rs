use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SourceType;

/// A retrieval request. Created per call and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub filter: QueryFilter,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Hard metadata predicate. Every populated field must match; list fields
/// match when the chunk carries any of the listed values.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QueryFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub techniques: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cves: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_types: Vec<SourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

impl QueryFilter {
    pub fn is_empty(&self) -> bool {
        self == &QueryFilter::default()
    }
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.filter.actors.push(actor.into());
        self
    }

    pub fn with_technique(mut self, technique: impl Into<String>) -> Self {
        self.filter.techniques.push(technique.into());
        self
    }

    pub fn with_cve(mut self, cve: impl Into<String>) -> Self {
        self.filter.cves.push(cve.into());
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.filter.source_types.push(source_type);
        self
    }

    pub fn published_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.filter.published_after = after;
        self.filter.published_before = before;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.filter.min_confidence = Some(min_confidence);
        self
    }
}
