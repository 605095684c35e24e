use sha2::{Digest, Sha256};

use super::text::{floor_char_boundary, push_trimmed, sentence_spans};
use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkMetadata, Document};

/// Splits documents into overlapping, sentence-aligned chunks.
///
/// Sentences are packed greedily up to `chunk_size` bytes. A single sentence
/// longer than `chunk_size` is hard-split, preferring whitespace. Each new
/// chunk re-includes the trailing sentences of the previous one as long as
/// they fit in `overlap_bytes`, and always starts at a later sentence than
/// its predecessor, so no chunk contains another from the same document.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap_bytes: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        let overlap = (chunk_size as f64 * config.chunk_overlap.clamp(0.0, 0.5)).floor() as usize;
        Self {
            chunk_size,
            overlap_bytes: overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap_bytes(&self) -> usize {
        self.overlap_bytes
    }

    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.source_id.trim().is_empty() {
            return Err(RagError::InvalidDocument(
                "document metadata lacks a source id".to_string(),
            ));
        }
        if document.text.trim().is_empty() {
            return Err(RagError::InvalidDocument(format!(
                "document '{}' has empty text",
                document.source_id
            )));
        }

        let text = document.text.as_str();
        let units = self.units(text);
        let metadata = ChunkMetadata::from_document(document);

        let chunks: Vec<Chunk> = self
            .windows(&units)
            .into_iter()
            .enumerate()
            .map(|(position, (start, end))| {
                let content = &text[start..end];
                Chunk {
                    id: chunk_id(&document.source_id, start),
                    source_id: document.source_id.clone(),
                    text: content.to_string(),
                    start,
                    end,
                    position,
                    content_hash: content_hash(content),
                    metadata: metadata.clone(),
                    embedding: None,
                }
            })
            .collect();

        tracing::debug!(
            source_id = %document.source_id,
            chunks = chunks.len(),
            text_len = text.len(),
            "Chunked document"
        );

        Ok(chunks)
    }

    /// Sentence spans, with oversized sentences hard-split.
    fn units(&self, text: &str) -> Vec<(usize, usize)> {
        let mut units = Vec::new();
        for (start, end) in sentence_spans(text) {
            if end - start <= self.chunk_size {
                units.push((start, end));
            } else {
                self.hard_split(text, start, end, &mut units);
            }
        }
        units
    }

    fn hard_split(&self, text: &str, start: usize, end: usize, units: &mut Vec<(usize, usize)>) {
        let mut cursor = start;
        while end - cursor > self.chunk_size {
            let limit = floor_char_boundary(text, cursor + self.chunk_size);
            let mut cut = match text[cursor..limit].rfind(char::is_whitespace) {
                Some(ws) if ws > 0 => cursor + ws,
                _ => limit,
            };
            if cut <= cursor {
                // Single char wider than the chunk size.
                cut = cursor + text[cursor..].chars().next().map_or(1, char::len_utf8);
            }
            push_trimmed(text, cursor, cut, units);
            cursor = cut;
            cursor += text[cursor..end].len() - text[cursor..end].trim_start().len();
        }
        push_trimmed(text, cursor, end, units);
    }

    fn windows(&self, units: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let mut windows = Vec::new();
        if units.is_empty() {
            return windows;
        }

        let mut first = 0;
        loop {
            let window_start = units[first].0;
            let mut last = first;
            while last + 1 < units.len() && units[last + 1].1 - window_start <= self.chunk_size {
                last += 1;
            }
            windows.push((window_start, units[last].1));

            if last + 1 >= units.len() {
                break;
            }

            let next = last + 1;
            let overlap_end = units[last].1;
            first = (first + 1..=next)
                .find(|&k| {
                    overlap_end.saturating_sub(units[k].0) <= self.overlap_bytes
                        && units[next].1 - units[k].0 <= self.chunk_size
                })
                .unwrap_or(next);
        }

        windows
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(&ChunkingConfig::default())
    }
}

pub fn chunk_id(source_id: &str, start: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(start.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
