use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use validator::{Validate, ValidationError};

use super::{Metadata, SourceType};
use crate::error::{RagError, Result};

/// A normalized CTI document, as produced by the ingestion pipeline.
///
/// Documents are immutable once ingested. Ingesting a document whose
/// `source_id` is already indexed supersedes every chunk of the previous
/// version.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Document {
    #[validate(length(min = 1, max = 512))]
    pub source_id: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub title: Option<String>,
    #[validate(length(min = 1))]
    pub text: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(nested)]
    pub metadata: ThreatMetadata,
}

/// Fixed CTI metadata schema plus an open extension map.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct ThreatMetadata {
    #[serde(default)]
    pub actors: Vec<String>,
    /// MITRE ATT&CK technique ids, e.g. `T1566` or `T1059.001`.
    #[serde(default)]
    #[validate(custom(function = "validate_technique_ids"))]
    pub techniques: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_cve_ids"))]
    pub cves: Vec<String>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: Option<f64>,
    #[serde(default)]
    #[validate(custom(function = "validate_extra"))]
    pub extra: Metadata,
}

fn technique_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^T\d{4}(\.\d{3})?$").expect("valid technique regex"))
}

fn cve_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^CVE-\d{4}-\d{4,}$").expect("valid CVE regex"))
}

fn validate_technique_ids(values: &[String]) -> std::result::Result<(), ValidationError> {
    for value in values {
        if !technique_pattern().is_match(&value.trim().to_uppercase()) {
            let mut error = ValidationError::new("technique_id");
            error.message = Some(format!("'{value}' is not a MITRE technique id").into());
            return Err(error);
        }
    }
    Ok(())
}

fn validate_cve_ids(values: &[String]) -> std::result::Result<(), ValidationError> {
    for value in values {
        if !cve_pattern().is_match(&value.trim().to_uppercase()) {
            let mut error = ValidationError::new("cve_id");
            error.message = Some(format!("'{value}' is not a CVE id").into());
            return Err(error);
        }
    }
    Ok(())
}

fn validate_extra(extra: &Metadata) -> std::result::Result<(), ValidationError> {
    fn is_scalar(value: &serde_json::Value) -> bool {
        !matches!(value, serde_json::Value::Object(_) | serde_json::Value::Array(_))
    }

    for (key, value) in extra {
        if key.trim().is_empty() {
            return Err(ValidationError::new("extra_key_empty"));
        }
        let ok = match value {
            serde_json::Value::Array(items) => items.iter().all(is_scalar),
            other => is_scalar(other),
        };
        if !ok {
            let mut error = ValidationError::new("extra_value_shape");
            error.message =
                Some(format!("extension field '{key}' must be a scalar or list of scalars").into());
            return Err(error);
        }
    }
    Ok(())
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_type: SourceType::default(),
            title: None,
            text: text.into(),
            published_at: None,
            metadata: ThreatMetadata::default(),
        }
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.metadata.actors.push(actor.into());
        self
    }

    pub fn with_technique(mut self, technique: impl Into<String>) -> Self {
        self.metadata.techniques.push(technique.into());
        self
    }

    pub fn with_cve(mut self, cve: impl Into<String>) -> Self {
        self.metadata.cves.push(cve.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.metadata.confidence = Some(confidence);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.extra.insert(key.into(), value);
        self
    }

    /// Checks a document before it enters the write path.
    pub fn validate_for_ingest(&self) -> Result<()> {
        if self.source_id.trim().is_empty() {
            return Err(RagError::InvalidDocument(
                "document metadata lacks a source id".to_string(),
            ));
        }
        if self.text.trim().is_empty() {
            return Err(RagError::InvalidDocument(format!(
                "document '{}' has empty text",
                self.source_id
            )));
        }
        self.validate().map_err(|e| {
            RagError::InvalidDocument(format!("document '{}': {e}", self.source_id))
        })
    }
}
