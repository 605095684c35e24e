mod chunker;
mod pipeline;
mod text;

pub use chunker::{chunk_id, content_hash, Chunker};
pub use pipeline::{IngestOutcome, IngestPipeline, IngestReport};
pub use text::{
    is_stop_word, normalize_prefix, sentence_spans, term_frequencies, tokenize, STOP_WORDS,
};
