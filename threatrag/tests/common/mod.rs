#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use threatrag::config::{Config, EmbeddingsConfig, RetryConfig};
use threatrag::models::Document;
use threatrag::ThreatRag;

pub const DIMENSIONS: usize = 256;

/// Config backed by the deterministic hashing embedder.
pub fn test_config() -> Config {
    Config {
        embeddings: EmbeddingsConfig {
            model: "hash/test".to_string(),
            dimensions: DIMENSIONS,
            ..Default::default()
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        },
        ..Default::default()
    }
}

pub fn test_rag() -> ThreatRag {
    ThreatRag::from_config(test_config()).expect("hash-backed config is valid")
}

pub fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn apt29_report() -> Document {
    Document::new(
        "report-apt29",
        "APT29 uses spear-phishing and PowerShell persistence.",
    )
    .with_title("APT29 activity update")
    .with_actor("APT29")
    .with_technique("T1566.001")
    .with_technique("T1059.001")
    .with_confidence(0.9)
}

pub fn apt28_advisory() -> Document {
    Document::new(
        "advisory-apt28",
        "APT28 exploited CVE-2023-23397 in Outlook to harvest NTLM hashes.",
    )
    .with_title("APT28 Outlook exploitation")
    .with_actor("APT28")
    .with_cve("CVE-2023-23397")
    .with_confidence(0.7)
}
