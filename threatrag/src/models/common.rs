use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open extension map for source-specific fields. Ordered so serialized
/// output and hashing stay deterministic.
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Report,
    Advisory,
    FeedEntry,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Report => write!(f, "report"),
            Self::Advisory => write!(f, "advisory"),
            Self::FeedEntry => write!(f, "feed_entry"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "report" => Ok(Self::Report),
            "advisory" => Ok(Self::Advisory),
            "feed_entry" | "feed" => Ok(Self::FeedEntry),
            _ => Err(format!("Unknown source type: {s}")),
        }
    }
}
