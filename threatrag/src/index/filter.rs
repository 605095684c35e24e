use crate::models::{Chunk, QueryFilter};

/// Normalised form of a [`QueryFilter`], applied as a hard predicate.
///
/// Actors compare case-insensitively. A technique filter also matches its
/// sub-techniques (`T1566` matches `T1566.001`). Date bounds are inclusive and
/// exclude chunks without a timestamp. Missing confidence counts as
/// `default_confidence`.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    filter: QueryFilter,
    default_confidence: f64,
}

impl ChunkFilter {
    pub fn new(filter: &QueryFilter, default_confidence: f64) -> Self {
        let mut filter = filter.clone();
        filter.actors = filter.actors.iter().map(|a| a.trim().to_lowercase()).collect();
        filter.techniques = filter
            .techniques
            .iter()
            .map(|t| t.trim().to_uppercase())
            .collect();
        filter.cves = filter.cves.iter().map(|c| c.trim().to_uppercase()).collect();
        Self {
            filter,
            default_confidence,
        }
    }

    /// A filter that accepts everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn default_confidence(&self) -> f64 {
        self.default_confidence
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        let f = &self.filter;
        let meta = &chunk.metadata;

        if !f.actors.is_empty()
            && !meta
                .actors
                .iter()
                .any(|actor| f.actors.contains(&actor.trim().to_lowercase()))
        {
            return false;
        }

        if !f.techniques.is_empty()
            && !meta.techniques.iter().any(|technique| {
                f.techniques.iter().any(|wanted| {
                    technique == wanted
                        || technique
                            .strip_prefix(wanted.as_str())
                            .is_some_and(|rest| rest.starts_with('.'))
                })
            })
        {
            return false;
        }

        if !f.cves.is_empty() && !meta.cves.iter().any(|cve| f.cves.contains(cve)) {
            return false;
        }

        if !f.source_types.is_empty() && !f.source_types.contains(&meta.source_type) {
            return false;
        }

        if f.published_after.is_some() || f.published_before.is_some() {
            let Some(published) = meta.published_at else {
                return false;
            };
            if f.published_after.is_some_and(|after| published < after) {
                return false;
            }
            if f.published_before.is_some_and(|before| published > before) {
                return false;
            }
        }

        if let Some(min) = f.min_confidence {
            if meta.confidence.unwrap_or(self.default_confidence) < min {
                return false;
            }
        }

        true
    }
}
